//! Environment readiness check.

use crate::cli::output;
use crate::publish::{CatalogueStore, SqliteStore};
use crate::raster::pdfium::load_pdfium;
use crate::renderer::chromium::find_chromium;
use anyhow::Result;
use serde::Serialize;
use std::path::Path;

#[derive(Debug, Serialize)]
struct Check {
    name: &'static str,
    ok: bool,
    detail: String,
}

/// Check Chromium, PDFium, the store and the publish root.
pub async fn run(config_path: Option<&Path>) -> Result<()> {
    let config = super::load_config(config_path)?;
    let mut checks = Vec::new();

    checks.push(match find_chromium(config.chromium_path.as_ref()) {
        Some(path) => Check {
            name: "chromium",
            ok: true,
            detail: format!("found: {}", path.display()),
        },
        None => Check {
            name: "chromium",
            ok: false,
            detail: "not found; install Chrome/Chromium or set CATALOGUE_CHROMIUM_PATH".into(),
        },
    });

    checks.push(match load_pdfium() {
        Ok(_) => Check {
            name: "pdfium",
            ok: true,
            detail: "library loaded".into(),
        },
        Err(e) => Check {
            name: "pdfium",
            ok: false,
            detail: e.to_string(),
        },
    });

    let store = SqliteStore::open(&config.database_path).and_then(|s| s.ping());
    checks.push(Check {
        name: "store",
        ok: store.is_ok(),
        detail: match store {
            Ok(()) => format!("{} answers queries", config.database_path.display()),
            Err(e) => format!("{}: {e}", config.database_path.display()),
        },
    });

    checks.push(match check_writable(&config.publish_root) {
        Ok(()) => Check {
            name: "publish_root",
            ok: true,
            detail: format!("{} is writable", config.publish_root.display()),
        },
        Err(e) => Check {
            name: "publish_root",
            ok: false,
            detail: format!("{}: {e}", config.publish_root.display()),
        },
    });

    let ready = checks.iter().all(|c| c.ok);

    if output::is_json() {
        output::print_json(&serde_json::json!({
            "ready": ready,
            "checks": checks,
            "retailers": config.retailers.iter().map(|r| r.id.to_string()).collect::<Vec<_>>(),
        }));
        return Ok(());
    }

    println!("Catalogue Doctor");
    println!("================");
    println!();
    for check in &checks {
        let tag = if check.ok { "[OK]" } else { "[!!]" };
        println!("{tag} {:<13} {}", check.name, check.detail);
    }
    println!();
    println!(
        "Retailers: {}",
        config
            .retailers
            .iter()
            .map(|r| r.id.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );
    println!("Schedule:  {}", config.schedule);
    println!();
    println!("Status: {}", if ready { "READY" } else { "NOT READY" });
    Ok(())
}

/// Create the directory if needed and write and remove a marker file.
fn check_writable(dir: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;
    let marker = dir.join(".catalogue-doctor-check");
    std::fs::write(&marker, b"ok")?;
    std::fs::remove_file(&marker)
}
