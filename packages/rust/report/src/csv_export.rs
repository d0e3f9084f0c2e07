//! Delimited report files.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use luna_core::Reports;
use luna_shared::{LunaError, Result};
use serde::Serialize;

/// Byte-order mark so spreadsheet apps detect UTF-8.
const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

const WEB_ASSET_HEADERS: [&str; 5] = ["domain", "subdomain", "url", "status_code", "title"];
const IP_PORT_HEADERS: [&str; 6] = ["domain", "subdomain", "ip", "port", "status_code", "title"];

/// Write `<domain>_web_assets.csv` and `<domain>_ip_ports.csv` into `dir`.
pub fn write_csv(dir: &Path, domain: &str, reports: &Reports) -> Result<Vec<PathBuf>> {
    let web = dir.join(format!("{domain}_web_assets.csv"));
    write_table(&web, &WEB_ASSET_HEADERS, &reports.web_assets)?;

    let ports = dir.join(format!("{domain}_ip_ports.csv"));
    write_table(&ports, &IP_PORT_HEADERS, &reports.ip_ports)?;

    tracing::info!(web = %web.display(), ports = %ports.display(), "csv reports written");
    Ok(vec![web, ports])
}

/// Headers are written explicitly so an empty table still has them.
fn write_table<R: Serialize>(path: &Path, headers: &[&str], rows: &[R]) -> Result<()> {
    let mut file = File::create(path).map_err(|e| LunaError::io(path, e))?;
    file.write_all(UTF8_BOM).map_err(|e| LunaError::io(path, e))?;

    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(file);
    writer
        .write_record(headers)
        .map_err(|e| export_error(path, e))?;
    for row in rows {
        writer.serialize(row).map_err(|e| export_error(path, e))?;
    }
    writer.flush().map_err(|e| LunaError::io(path, e))
}

fn export_error(path: &Path, e: csv::Error) -> LunaError {
    LunaError::Export(format!("{}: {e}", path.display()))
}
