use crate::models::{CloudFile, DocumentRecord, Section};
use chrono::{DateTime, NaiveDate, Utc};
use prettytable::{Cell, Row, Table};

const SIZE_UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];

/// Human readable size with up to two decimals, e.g. `1.5 KB`.
pub fn format_file_size(bytes: u64) -> String {
    if bytes == 0 {
        return "0 B".to_string();
    }
    let exponent = ((bytes as f64).ln() / 1024f64.ln()).floor() as usize;
    let exponent = exponent.min(SIZE_UNITS.len() - 1);
    let value = bytes as f64 / 1024f64.powi(exponent as i32);
    let rounded = (value * 100.0).round() / 100.0;
    format!("{} {}", rounded, SIZE_UNITS[exponent])
}

pub fn format_amount(amount: f64) -> String {
    format!("{:.2} SAR", amount)
}

/// Dates are shown as entered unless they parse as a calendar date.
pub fn format_date(date: &str) -> String {
    NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .map(|d| d.format("%d/%m/%Y").to_string())
        .unwrap_or_else(|_| date.to_string())
}

fn format_timestamp(timestamp: &str) -> String {
    timestamp
        .parse::<DateTime<Utc>>()
        .map(|t| t.format("%d/%m/%Y").to_string())
        .unwrap_or_else(|_| "-".to_string())
}

pub fn render_documents(section: Section, documents: &[DocumentRecord]) -> String {
    if documents.is_empty() {
        return format!("📄 {}\n   No documents in this section.\n", section.title());
    }

    let mut table = Table::new();
    table.add_row(Row::new(vec![
        Cell::new("ID"),
        Cell::new("Category"),
        Cell::new("Title"),
        Cell::new("Date"),
        Cell::new("Amount due"),
        Cell::new("Notes"),
        Cell::new("File"),
    ]));

    for doc in documents {
        let file = match (&doc.file_name, &doc.file_link) {
            (Some(name), Some(link)) => format!("🔗 {} ({})", name, link),
            (None, Some(link)) => format!("🔗 {}", link),
            _ => "-".to_string(),
        };
        table.add_row(Row::new(vec![
            Cell::new(&doc.id),
            Cell::new(&doc.category),
            Cell::new(&doc.title),
            Cell::new(&format_date(&doc.date)),
            Cell::new(&doc.amount.map(format_amount).unwrap_or_else(|| "-".to_string())),
            Cell::new(doc.notes.as_deref().unwrap_or("-")),
            Cell::new(&file),
        ]));
    }

    format!("📄 {} ({})\n{}", section.title(), documents.len(), table)
}

/// Every filing section's cards in one printable document, in tab order.
/// The cloud tab holds no records and is left out.
pub fn render_index(documents: &[DocumentRecord], printed_on: NaiveDate) -> String {
    let mut out = format!(
        "📑 Document index ({} documents, {})\n\n",
        documents.len(),
        printed_on.format("%d/%m/%Y")
    );
    for section in Section::ALL.into_iter().filter(|section| !section.is_cloud()) {
        let in_section: Vec<DocumentRecord> = documents
            .iter()
            .filter(|doc| doc.section == section)
            .cloned()
            .collect();
        out.push_str(&render_documents(section, &in_section));
        out.push('\n');
    }
    out
}

pub fn render_cloud_files(files: &[CloudFile]) -> String {
    if files.is_empty() {
        return "☁️  No uploaded files.\n".to_string();
    }

    let mut table = Table::new();
    table.add_row(Row::new(vec![
        Cell::new("Name"),
        Cell::new("Size"),
        Cell::new("Uploaded"),
        Cell::new("Key"),
    ]));
    for file in files {
        table.add_row(Row::new(vec![
            Cell::new(&file.name),
            Cell::new(&format_file_size(file.size)),
            Cell::new(&format_timestamp(&file.uploaded_at)),
            Cell::new(&file.key),
        ]));
    }
    format!("☁️  {} ({})\n{}", Section::CloudFiles.title(), files.len(), table)
}

pub fn render_sections(current: Section) -> String {
    let mut table = Table::new();
    table.add_row(Row::new(vec![Cell::new(""), Cell::new("Section"), Cell::new("Title")]));
    for section in Section::ALL {
        let marker = if section == current { "▶" } else { "" };
        table.add_row(Row::new(vec![
            Cell::new(marker),
            Cell::new(section.slug()),
            Cell::new(section.title()),
        ]));
    }
    table.to_string()
}
