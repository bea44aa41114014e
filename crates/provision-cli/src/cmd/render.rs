use crate::output::{print_json, print_table};
use anyhow::Context;
use provision_core::config::Configuration;
use provision_core::{io, template};
use std::path::Path;

pub fn run(cfg: &Configuration, out: Option<&Path>, json: bool) -> anyhow::Result<()> {
    let artifacts = template::render_all(cfg).context("failed to render templates")?;

    let Some(dir) = out else {
        if json {
            return print_json(&artifacts);
        }
        for a in &artifacts {
            println!("# ==> {} <==", a.path.display());
            print!("{}", a.contents);
            println!();
        }
        return Ok(());
    };

    let mut rows = Vec::with_capacity(artifacts.len());
    for a in &artifacts {
        let name = a
            .path
            .file_name()
            .with_context(|| format!("{} has no file name", a.path.display()))?;
        let dest = dir.join(name);
        io::atomic_write(&dest, a.contents.as_bytes())
            .with_context(|| format!("failed to write {}", dest.display()))?;
        rows.push(vec![a.kind.as_str().to_string(), dest.display().to_string()]);
    }

    if json {
        let written: Vec<serde_json::Value> = rows
            .iter()
            .map(|r| serde_json::json!({ "kind": r[0], "written_to": r[1] }))
            .collect();
        print_json(&written)
    } else {
        print_table(&["FILE", "WRITTEN TO"], rows);
        Ok(())
    }
}
