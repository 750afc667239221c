use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Largest file the upload endpoint accepts: 50 MiB.
pub const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

pub const UPLOAD_ROUTE: &str = "/api/upload";
pub const LIST_ROUTE: &str = "/api/list";
pub const DOWNLOAD_ROUTE: &str = "/api/download";

/// Metadata stored next to every uploaded blob.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobMetadata {
    pub original_name: String,
    pub content_type: String,
    pub size: String,
    pub uploaded_at: String,
}

impl BlobMetadata {
    pub fn new(original_name: String, content_type: String, size: usize, uploaded_at: DateTime<Utc>) -> Self {
        Self {
            original_name,
            content_type,
            size: size.to_string(),
            uploaded_at: uploaded_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub success: bool,
    pub file_key: String,
    pub file_name: String,
    pub file_size: u64,
    pub download_url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudFile {
    pub key: String,
    pub name: String,
    pub size: u64,
    pub content_type: String,
    pub uploaded_at: String,
    pub download_url: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FileListResponse {
    pub files: Vec<CloudFile>,
}

/// Relative URL under which the download endpoint serves `key`.
pub fn download_url(key: &str) -> String {
    let encoded: String = url::form_urlencoded::byte_serialize(key.as_bytes()).collect();
    format!("{}?key={}", DOWNLOAD_ROUTE, encoded)
}

/// The fixed set of sections documents are filed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Section {
    #[serde(rename = "shop-21")]
    Shop21,
    #[serde(rename = "shop-22")]
    Shop22,
    #[serde(rename = "shop-25")]
    Shop25,
    CivilDefense,
    Maintenance,
    InsuranceCompany,
    GeneralCorrespondence,
    Attachments,
    CloudFiles,
}

impl Section {
    pub const ALL: [Section; 9] = [
        Section::Shop21,
        Section::Shop22,
        Section::Shop25,
        Section::CivilDefense,
        Section::Maintenance,
        Section::InsuranceCompany,
        Section::GeneralCorrespondence,
        Section::Attachments,
        Section::CloudFiles,
    ];

    pub fn slug(&self) -> &'static str {
        match self {
            Section::Shop21 => "shop-21",
            Section::Shop22 => "shop-22",
            Section::Shop25 => "shop-25",
            Section::CivilDefense => "civil-defense",
            Section::Maintenance => "maintenance",
            Section::InsuranceCompany => "insurance-company",
            Section::GeneralCorrespondence => "general-correspondence",
            Section::Attachments => "attachments",
            Section::CloudFiles => "cloud-files",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Section::Shop21 => "Shop 21 – Makbous Hashi Restaurant",
            Section::Shop22 => "Shop 22 – Kingdom Dates Establishment",
            Section::Shop25 => "Shop 25 – Hala Al-Sham Roastery",
            Section::CivilDefense => "Building Civil Defense",
            Section::Maintenance => "Maintenance",
            Section::InsuranceCompany => "Insurance Company",
            Section::GeneralCorrespondence => "General Correspondence",
            Section::Attachments => "Attachments",
            Section::CloudFiles => "File Cloud",
        }
    }

    /// The cloud section lists uploaded files instead of document cards.
    pub fn is_cloud(&self) -> bool {
        matches!(self, Section::CloudFiles)
    }
}

impl Default for Section {
    fn default() -> Self {
        Section::Shop21
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown section '{0}'")]
pub struct UnknownSection(pub String);

impl FromStr for Section {
    type Err = UnknownSection;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Section::ALL
            .iter()
            .copied()
            .find(|section| section.slug() == s)
            .ok_or_else(|| UnknownSection(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentRecord {
    pub id: String,
    pub section: Section,
    pub category: String,
    pub title: String,
    pub date: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
}

/// Every user-editable field of a record; what a submitted form produces.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentDraft {
    pub section: Section,
    pub category: String,
    pub title: String,
    pub date: String,
    pub amount: Option<f64>,
    pub notes: Option<String>,
    pub file_link: Option<String>,
    pub file_name: Option<String>,
}

impl DocumentRecord {
    pub fn from_draft(id: String, draft: DocumentDraft) -> Self {
        Self {
            id,
            section: draft.section,
            category: draft.category,
            title: draft.title,
            date: draft.date,
            amount: draft.amount,
            notes: draft.notes,
            file_link: draft.file_link,
            file_name: draft.file_name,
        }
    }

    /// Replaces every field but `id`. The file name survives edits that did
    /// not upload a new file.
    pub fn apply(&mut self, draft: DocumentDraft) {
        self.section = draft.section;
        self.category = draft.category;
        self.title = draft.title;
        self.date = draft.date;
        self.amount = draft.amount;
        self.notes = draft.notes;
        self.file_link = draft.file_link;
        if draft.file_name.is_some() {
            self.file_name = draft.file_name;
        }
    }
}
