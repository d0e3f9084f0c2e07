//! Spreadsheet report: one workbook, one sheet per table.

use std::path::{Path, PathBuf};

use luna_core::Reports;
use luna_shared::{LunaError, Result};
use rust_xlsxwriter::{Format, Workbook, Worksheet, XlsxError};

pub const WEB_ASSETS_SHEET: &str = "Web Assets";
pub const IP_PORTS_SHEET: &str = "IP Ports";

const WEB_ASSET_COLUMNS: [(&str, f64); 5] = [
    ("Domain", 20.0),
    ("Subdomain", 32.0),
    ("URL", 50.0),
    ("Status", 8.0),
    ("Title", 40.0),
];

const IP_PORT_COLUMNS: [(&str, f64); 6] = [
    ("Domain", 20.0),
    ("Subdomain", 32.0),
    ("IP", 16.0),
    ("Port", 8.0),
    ("Status", 8.0),
    ("Title", 40.0),
];

/// Write `<domain>_report.xlsx` into `dir`.
pub fn write_xlsx(dir: &Path, domain: &str, reports: &Reports) -> Result<PathBuf> {
    let path = dir.join(format!("{domain}_report.xlsx"));
    build_workbook(reports)
        .and_then(|mut workbook| workbook.save(&path))
        .map_err(|e| LunaError::Export(format!("{}: {e}", path.display())))?;
    tracing::info!(path = %path.display(), "xlsx report written");
    Ok(path)
}

fn build_workbook(reports: &Reports) -> std::result::Result<Workbook, XlsxError> {
    let mut workbook = Workbook::new();
    let header = Format::new().set_bold();

    let sheet = workbook.add_worksheet();
    sheet.set_name(WEB_ASSETS_SHEET)?;
    write_header(sheet, &WEB_ASSET_COLUMNS, &header)?;
    for (i, row) in reports.web_assets.iter().enumerate() {
        let r = i as u32 + 1;
        sheet.write(r, 0, row.domain.as_str())?;
        sheet.write(r, 1, row.subdomain.as_str())?;
        sheet.write(r, 2, row.url.as_str())?;
        if let Some(status) = row.status_code {
            sheet.write(r, 3, status)?;
        }
        sheet.write(r, 4, row.title.as_str())?;
    }

    let sheet = workbook.add_worksheet();
    sheet.set_name(IP_PORTS_SHEET)?;
    write_header(sheet, &IP_PORT_COLUMNS, &header)?;
    for (i, row) in reports.ip_ports.iter().enumerate() {
        let r = i as u32 + 1;
        sheet.write(r, 0, row.domain.as_str())?;
        sheet.write(r, 1, row.subdomain.as_str())?;
        sheet.write(r, 2, row.ip.as_str())?;
        sheet.write(r, 3, row.port)?;
        if let Some(status) = row.status_code {
            sheet.write(r, 4, status)?;
        }
        sheet.write(r, 5, row.title.as_str())?;
    }

    Ok(workbook)
}

fn write_header(
    sheet: &mut Worksheet,
    columns: &[(&str, f64)],
    format: &Format,
) -> std::result::Result<(), XlsxError> {
    for (col, (title, width)) in columns.iter().enumerate() {
        let col = col as u16;
        sheet.write_with_format(0, col, *title, format)?;
        sheet.set_column_width(col, *width)?;
    }
    Ok(())
}
