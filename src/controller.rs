use crate::cloud_client::ProgressSender;
use crate::document_store::{DocumentStore, RecordStorage};
use crate::models::{CloudFile, DocumentDraft, DocumentRecord, Section, UploadResponse};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// The remote file endpoints as seen by the client.
#[async_trait]
pub trait CloudFiles: Send + Sync {
    async fn upload(&self, path: &Path, progress: Option<ProgressSender>) -> Result<UploadResponse>;

    async fn list(&self) -> Result<Vec<CloudFile>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// Confirmation prompts and transient notices shown to the user.
pub trait Interaction {
    fn confirm(&mut self, message: &str) -> bool;

    fn notify(&mut self, level: NotificationLevel, message: &str);
}

#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("Adding documents is disabled")]
    AddingDisabled,

    #[error("Title is required")]
    MissingTitle,

    #[error("Documents cannot be filed under {0}")]
    CloudSection(Section),

    #[error("Document {0} not found")]
    NotFound(String),

    #[error("File upload failed: {0:#}")]
    Upload(#[source] anyhow::Error),

    #[error("Invalid import file: {0}")]
    InvalidImport(String),

    #[error("Failed to load cloud files: {0:#}")]
    Cloud(#[source] anyhow::Error),

    #[error("Storage error: {0:#}")]
    Storage(#[source] anyhow::Error),
}

/// UI state that lives only as long as the session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AppState {
    pub current_section: Section,
    pub adding_disabled: bool,
}

/// The add/edit form, bound once instead of looked up field by field.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentForm {
    /// Set when the form edits an existing record.
    pub edit_id: Option<String>,
    pub section: Section,
    pub category: String,
    pub title: String,
    pub date: String,
    pub amount: Option<f64>,
    pub notes: Option<String>,
    pub external_link: Option<String>,
    /// A local file to upload before saving.
    pub attachment: Option<PathBuf>,
}

impl DocumentForm {
    pub fn for_section(section: Section) -> Self {
        Self {
            section,
            ..Default::default()
        }
    }

    pub fn for_record(record: &DocumentRecord) -> Self {
        Self {
            edit_id: Some(record.id.clone()),
            section: record.section,
            category: record.category.clone(),
            title: record.title.clone(),
            date: record.date.clone(),
            amount: record.amount,
            notes: record.notes.clone(),
            external_link: record.file_link.clone(),
            attachment: None,
        }
    }

    fn draft(&self) -> DocumentDraft {
        DocumentDraft {
            section: self.section,
            category: self.category.clone(),
            title: self.title.trim().to_string(),
            date: self.date.clone(),
            amount: self.amount,
            notes: self.notes.clone().filter(|notes| !notes.trim().is_empty()),
            file_link: self.external_link.clone().filter(|link| !link.trim().is_empty()),
            file_name: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum View {
    Documents {
        section: Section,
        documents: Vec<DocumentRecord>,
    },
    Cloud {
        files: Vec<CloudFile>,
    },
    CloudUnavailable {
        message: String,
    },
}

impl View {
    /// Add/import controls are hidden while browsing the cloud.
    pub fn allows_adding(&self) -> bool {
        matches!(self, View::Documents { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportOutcome {
    Imported(usize),
    Cancelled,
}

pub fn export_file_name(date: NaiveDate) -> String {
    format!("documents-{}.json", date.format("%Y-%m-%d"))
}

pub struct Controller<S, C, I> {
    store: DocumentStore<S>,
    cloud: C,
    ui: I,
    state: AppState,
}

impl<S, C, I> Controller<S, C, I>
where
    S: RecordStorage,
    C: CloudFiles,
    I: Interaction,
{
    pub fn new(store: DocumentStore<S>, cloud: C, ui: I) -> Self {
        Self {
            store,
            cloud,
            ui,
            state: AppState::default(),
        }
    }

    pub fn state(&self) -> AppState {
        self.state
    }

    pub fn store(&self) -> &DocumentStore<S> {
        &self.store
    }

    pub fn ui(&self) -> &I {
        &self.ui
    }

    pub fn toggle_adding(&mut self) -> bool {
        self.state.adding_disabled = !self.state.adding_disabled;
        self.state.adding_disabled
    }

    pub async fn switch_section(&mut self, section: Section) -> View {
        self.state.current_section = section;
        self.current_view().await
    }

    pub async fn current_view(&mut self) -> View {
        let section = self.state.current_section;
        if !section.is_cloud() {
            return View::Documents {
                section,
                documents: self.store.in_section(section).into_iter().cloned().collect(),
            };
        }
        match self.cloud.list().await {
            Ok(files) => View::Cloud { files },
            Err(e) => {
                let err = ControllerError::Cloud(e);
                self.ui.notify(NotificationLevel::Error, &err.to_string());
                View::CloudUnavailable {
                    message: err.to_string(),
                }
            }
        }
    }

    pub fn open_add_form(&mut self) -> Result<DocumentForm, ControllerError> {
        if self.state.adding_disabled {
            self.ui
                .notify(NotificationLevel::Warning, "Adding documents is disabled");
            return Err(ControllerError::AddingDisabled);
        }
        if self.state.current_section.is_cloud() {
            return Err(self.reject_cloud_section());
        }
        Ok(DocumentForm::for_section(self.state.current_section))
    }

    pub fn open_edit_form(&self, id: &str) -> Option<DocumentForm> {
        self.store.get(id).map(DocumentForm::for_record)
    }

    /// Uploads the attachment first, if any; a failed upload saves nothing
    /// and leaves the form with the caller for another attempt.
    pub async fn submit_form(
        &mut self,
        form: &DocumentForm,
        progress: Option<ProgressSender>,
    ) -> Result<DocumentRecord, ControllerError> {
        if form.title.trim().is_empty() {
            self.ui.notify(NotificationLevel::Error, "Title is required");
            return Err(ControllerError::MissingTitle);
        }
        if form.edit_id.is_none() && self.state.adding_disabled {
            self.ui
                .notify(NotificationLevel::Warning, "Adding documents is disabled");
            return Err(ControllerError::AddingDisabled);
        }
        if form.section.is_cloud() {
            return Err(self.reject_cloud_section());
        }
        if let Some(id) = &form.edit_id {
            if self.store.get(id).is_none() {
                return Err(ControllerError::NotFound(id.clone()));
            }
        }

        let mut draft = form.draft();
        if let Some(path) = &form.attachment {
            match self.cloud.upload(path, progress).await {
                Ok(uploaded) => {
                    draft.file_link = Some(uploaded.download_url);
                    draft.file_name = Some(uploaded.file_name);
                }
                Err(e) => {
                    let err = ControllerError::Upload(e);
                    self.ui.notify(NotificationLevel::Error, &err.to_string());
                    return Err(err);
                }
            }
        }

        let saved = match &form.edit_id {
            Some(id) => self
                .store
                .update(id, draft)
                .map_err(ControllerError::Storage)?
                .ok_or_else(|| ControllerError::NotFound(id.clone()))?,
            None => self.store.add(draft).map_err(ControllerError::Storage)?,
        };
        self.ui.notify(NotificationLevel::Success, "Document saved");
        Ok(saved)
    }

    fn reject_cloud_section(&mut self) -> ControllerError {
        let err = ControllerError::CloudSection(Section::CloudFiles);
        self.ui.notify(NotificationLevel::Warning, &err.to_string());
        err
    }

    /// Returns whether the record was deleted.
    pub fn delete_document(&mut self, id: &str) -> Result<bool, ControllerError> {
        if self.store.get(id).is_none() {
            return Err(ControllerError::NotFound(id.to_string()));
        }
        if !self.ui.confirm("Are you sure you want to delete this document?") {
            return Ok(false);
        }
        self.store.remove(id).map_err(ControllerError::Storage)
    }

    pub fn export_json(&self) -> Result<String, ControllerError> {
        serde_json::to_string_pretty(self.store.all())
            .map_err(|e| ControllerError::Storage(e.into()))
    }

    /// Writes the export into `dir` and returns the file path.
    pub fn export_to(&self, dir: &Path) -> Result<PathBuf, ControllerError> {
        let path = dir.join(export_file_name(Utc::now().date_naive()));
        let json = self.export_json()?;
        std::fs::write(&path, json).map_err(|e| ControllerError::Storage(e.into()))?;
        Ok(path)
    }

    /// Replaces the whole collection with `text`. Nothing changes unless the
    /// text is an array of valid records with distinct ids and the user
    /// confirms.
    pub fn import_json(&mut self, text: &str) -> Result<ImportOutcome, ControllerError> {
        let records = match parse_import(text) {
            Ok(records) => records,
            Err(err) => {
                self.ui.notify(NotificationLevel::Error, &err.to_string());
                return Err(err);
            }
        };

        let prompt = format!("{} documents will be imported. Continue?", records.len());
        if !self.ui.confirm(&prompt) {
            return Ok(ImportOutcome::Cancelled);
        }
        let count = records.len();
        self.store
            .replace_all(records)
            .map_err(ControllerError::Storage)?;
        self.ui
            .notify(NotificationLevel::Success, "Import completed successfully");
        Ok(ImportOutcome::Imported(count))
    }

    /// Needs two confirmations before wiping every record.
    pub fn clear_all(&mut self) -> Result<bool, ControllerError> {
        if !self
            .ui
            .confirm("Warning: all data will be permanently deleted. Are you sure?")
        {
            return Ok(false);
        }
        if !self
            .ui
            .confirm("Are you absolutely sure? This action cannot be undone.")
        {
            return Ok(false);
        }
        self.store.clear().map_err(ControllerError::Storage)?;
        self.ui.notify(NotificationLevel::Success, "All data cleared");
        Ok(true)
    }

    /// Standalone upload from the cloud section.
    pub async fn upload_to_cloud(
        &mut self,
        path: &Path,
        progress: Option<ProgressSender>,
    ) -> Result<UploadResponse, ControllerError> {
        match self.cloud.upload(path, progress).await {
            Ok(uploaded) => {
                self.ui
                    .notify(NotificationLevel::Success, "File uploaded successfully");
                Ok(uploaded)
            }
            Err(e) => {
                let err = ControllerError::Upload(e);
                self.ui.notify(NotificationLevel::Error, &err.to_string());
                Err(err)
            }
        }
    }
}

fn parse_import(text: &str) -> Result<Vec<DocumentRecord>, ControllerError> {
    let value: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| ControllerError::InvalidImport(format!("could not read file: {}", e)))?;
    if !value.is_array() {
        return Err(ControllerError::InvalidImport(
            "expected a JSON array of documents".to_string(),
        ));
    }
    let records: Vec<DocumentRecord> = serde_json::from_value(value)
        .map_err(|e| ControllerError::InvalidImport(e.to_string()))?;

    let mut seen = HashSet::new();
    if let Some(duplicate) = records.iter().find(|record| !seen.insert(record.id.as_str())) {
        return Err(ControllerError::InvalidImport(format!(
            "duplicate document id {}",
            duplicate.id
        )));
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud_client::UploadProgress;
    use crate::document_store::MemoryStorage;
    use anyhow::bail;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeCloud {
        fail_uploads: bool,
        fail_list: bool,
        uploads: Mutex<Vec<PathBuf>>,
    }

    #[async_trait]
    impl CloudFiles for FakeCloud {
        async fn upload(&self, path: &Path, progress: Option<ProgressSender>) -> Result<UploadResponse> {
            if self.fail_uploads {
                bail!("Server error: 500");
            }
            if let Some(progress) = progress {
                let _ = progress.send(UploadProgress { sent: 10, total: 10 });
            }
            self.uploads.lock().unwrap().push(path.to_path_buf());
            let name = path.file_name().unwrap().to_string_lossy().into_owned();
            Ok(UploadResponse {
                success: true,
                file_key: format!("1700000000000-{}", name),
                download_url: format!("/api/download?key=1700000000000-{}", name),
                file_name: name,
                file_size: 10,
            })
        }

        async fn list(&self) -> Result<Vec<CloudFile>> {
            if self.fail_list {
                bail!("connection refused");
            }
            Ok(vec![CloudFile {
                key: "1-a.txt".into(),
                name: "a.txt".into(),
                size: 10,
                content_type: "text/plain".into(),
                uploaded_at: "2025-01-01T00:00:00.000Z".into(),
                download_url: "/api/download?key=1-a.txt".into(),
            }])
        }
    }

    #[derive(Default)]
    struct ScriptedUi {
        answers: VecDeque<bool>,
        prompts: Vec<String>,
        notices: Vec<(NotificationLevel, String)>,
    }

    impl ScriptedUi {
        fn answering(answers: &[bool]) -> Self {
            Self {
                answers: answers.iter().copied().collect(),
                ..Default::default()
            }
        }
    }

    impl Interaction for ScriptedUi {
        fn confirm(&mut self, message: &str) -> bool {
            self.prompts.push(message.to_string());
            self.answers.pop_front().unwrap_or(false)
        }

        fn notify(&mut self, level: NotificationLevel, message: &str) {
            self.notices.push((level, message.to_string()));
        }
    }

    type TestController = Controller<MemoryStorage, FakeCloud, ScriptedUi>;

    fn controller(cloud: FakeCloud, ui: ScriptedUi) -> TestController {
        Controller::new(DocumentStore::open(MemoryStorage::new()).unwrap(), cloud, ui)
    }

    fn form(section: Section, title: &str) -> DocumentForm {
        DocumentForm {
            category: "Invoice".into(),
            title: title.into(),
            date: "2025-02-14".into(),
            ..DocumentForm::for_section(section)
        }
    }

    #[tokio::test]
    async fn switching_sections_only_shows_that_section() {
        let mut app = controller(FakeCloud::default(), ScriptedUi::default());
        app.submit_form(&form(Section::Shop21, "a"), None).await.unwrap();
        app.submit_form(&form(Section::Shop22, "b"), None).await.unwrap();
        app.submit_form(&form(Section::Maintenance, "c"), None).await.unwrap();

        for section in [Section::Shop21, Section::Shop22, Section::Maintenance, Section::Attachments] {
            match app.switch_section(section).await {
                View::Documents { section: shown, documents } => {
                    assert_eq!(shown, section);
                    assert!(documents.iter().all(|doc| doc.section == section));
                }
                other => panic!("unexpected view {:?}", other),
            }
        }
        assert_eq!(app.state().current_section, Section::Attachments);
    }

    #[tokio::test]
    async fn cloud_section_lists_files_and_hides_adding() {
        let mut app = controller(FakeCloud::default(), ScriptedUi::default());
        let view = app.switch_section(Section::CloudFiles).await;
        assert!(!view.allows_adding());
        match view {
            View::Cloud { files } => assert_eq!(files[0].name, "a.txt"),
            other => panic!("unexpected view {:?}", other),
        }

        let mut failing = controller(
            FakeCloud {
                fail_list: true,
                ..Default::default()
            },
            ScriptedUi::default(),
        );
        let view = failing.switch_section(Section::CloudFiles).await;
        assert!(matches!(view, View::CloudUnavailable { .. }));
        assert_eq!(failing.ui().notices[0].0, NotificationLevel::Error);
    }

    #[tokio::test]
    async fn add_form_starts_in_current_section_and_respects_lock() {
        let mut app = controller(FakeCloud::default(), ScriptedUi::default());
        app.switch_section(Section::InsuranceCompany).await;
        assert_eq!(app.open_add_form().unwrap().section, Section::InsuranceCompany);

        assert!(app.toggle_adding());
        assert!(matches!(app.open_add_form(), Err(ControllerError::AddingDisabled)));
        assert!(matches!(
            app.submit_form(&form(Section::Shop21, "x"), None).await,
            Err(ControllerError::AddingDisabled)
        ));
        assert!(!app.toggle_adding());
        assert!(app.open_add_form().is_ok());
    }

    #[tokio::test]
    async fn documents_cannot_be_filed_under_the_cloud_tab() {
        let mut app = controller(FakeCloud::default(), ScriptedUi::default());
        app.switch_section(Section::CloudFiles).await;
        assert!(matches!(app.open_add_form(), Err(ControllerError::CloudSection(_))));

        let err = app
            .submit_form(&form(Section::CloudFiles, "Stray"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ControllerError::CloudSection(_)));
        assert!(app.store().all().is_empty());
        assert!(app.cloud.uploads.lock().unwrap().is_empty());

        let saved = app.submit_form(&form(Section::Shop21, "Lease"), None).await.unwrap();
        let mut moved = app.open_edit_form(&saved.id).unwrap();
        moved.section = Section::CloudFiles;
        assert!(matches!(
            app.submit_form(&moved, None).await,
            Err(ControllerError::CloudSection(_))
        ));
        assert_eq!(app.store().all()[0].section, Section::Shop21);
    }

    #[tokio::test]
    async fn editing_still_works_while_adding_is_locked() {
        let mut app = controller(FakeCloud::default(), ScriptedUi::answering(&[true]));
        let saved = app.submit_form(&form(Section::Shop21, "Lease"), None).await.unwrap();
        app.toggle_adding();

        let mut edit = app.open_edit_form(&saved.id).unwrap();
        assert_eq!(edit.edit_id.as_deref(), Some(saved.id.as_str()));
        edit.title = "Lease renewed".into();
        let updated = app.submit_form(&edit, None).await.unwrap();
        assert_eq!(updated.id, saved.id);
        assert_eq!(app.store().all().len(), 1);
        assert_eq!(app.store().all()[0].title, "Lease renewed");

        assert!(app.delete_document(&saved.id).unwrap());
        assert!(app.store().all().is_empty());
    }

    #[tokio::test]
    async fn attachment_upload_replaces_the_link() {
        let mut app = controller(FakeCloud::default(), ScriptedUi::default());
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mut with_file = form(Section::Shop25, "Permit");
        with_file.external_link = Some("https://example.test/old".into());
        with_file.attachment = Some(PathBuf::from("/tmp/permit.pdf"));

        let saved = app.submit_form(&with_file, Some(tx)).await.unwrap();
        assert_eq!(
            saved.file_link.as_deref(),
            Some("/api/download?key=1700000000000-permit.pdf")
        );
        assert_eq!(saved.file_name.as_deref(), Some("permit.pdf"));
        assert_eq!(rx.recv().await.unwrap().percent(), 100.0);
    }

    #[tokio::test]
    async fn failed_upload_saves_nothing() {
        let cloud = FakeCloud {
            fail_uploads: true,
            ..Default::default()
        };
        let mut app = controller(cloud, ScriptedUi::default());
        let mut with_file = form(Section::Shop21, "Receipt");
        with_file.attachment = Some(PathBuf::from("/tmp/receipt.png"));

        let err = app.submit_form(&with_file, None).await.unwrap_err();
        assert!(matches!(err, ControllerError::Upload(_)));
        assert!(app.store().all().is_empty());
        assert_eq!(app.ui().notices.last().unwrap().0, NotificationLevel::Error);
    }

    #[tokio::test]
    async fn external_link_is_kept_verbatim_and_title_required() {
        let mut app = controller(FakeCloud::default(), ScriptedUi::default());
        let mut linked = form(Section::GeneralCorrespondence, "Letter");
        linked.external_link = Some("https://drive.example/letter".into());
        let saved = app.submit_form(&linked, None).await.unwrap();
        assert_eq!(saved.file_link.as_deref(), Some("https://drive.example/letter"));
        assert!(saved.file_name.is_none());

        let blank = form(Section::Shop21, "   ");
        assert!(matches!(
            app.submit_form(&blank, None).await,
            Err(ControllerError::MissingTitle)
        ));
    }

    #[tokio::test]
    async fn export_then_import_round_trips() {
        let mut source = controller(FakeCloud::default(), ScriptedUi::default());
        let mut first = form(Section::Shop21, "Lease");
        first.amount = Some(12500.5);
        first.notes = Some("Annual".into());
        source.submit_form(&first, None).await.unwrap();
        source.submit_form(&form(Section::Maintenance, "Pump"), None).await.unwrap();
        let exported = source.export_json().unwrap();

        let mut target = controller(FakeCloud::default(), ScriptedUi::answering(&[true]));
        let outcome = target.import_json(&exported).unwrap();
        assert_eq!(outcome, ImportOutcome::Imported(2));
        assert_eq!(target.store().all(), source.store().all());
        assert_eq!(
            target.ui().prompts[0],
            "2 documents will be imported. Continue?"
        );
    }

    #[tokio::test]
    async fn rejected_imports_change_nothing() {
        let mut app = controller(FakeCloud::default(), ScriptedUi::answering(&[false]));
        app.submit_form(&form(Section::Shop21, "Keep me"), None).await.unwrap();

        for bad in [
            "{\"id\": \"1\"}",
            "not json",
            "[{\"title\": \"missing fields\"}]",
            "[{\"id\":\"1\",\"section\":\"shop-21\",\"category\":\"\",\"title\":\"a\",\"date\":\"\"},\
              {\"id\":\"1\",\"section\":\"shop-22\",\"category\":\"\",\"title\":\"b\",\"date\":\"\"}]",
        ] {
            assert!(matches!(
                app.import_json(bad),
                Err(ControllerError::InvalidImport(_))
            ));
        }
        assert!(app.ui().prompts.is_empty());

        assert_eq!(app.import_json("[]").unwrap(), ImportOutcome::Cancelled);
        assert_eq!(app.store().all().len(), 1);
    }

    #[tokio::test]
    async fn clear_all_needs_two_confirmations() {
        let mut app = controller(FakeCloud::default(), ScriptedUi::answering(&[true, false, true, true]));
        app.submit_form(&form(Section::Shop21, "a"), None).await.unwrap();

        assert!(!app.clear_all().unwrap());
        assert_eq!(app.store().all().len(), 1);
        assert!(app.clear_all().unwrap());
        assert!(app.store().all().is_empty());
        assert_eq!(app.ui().prompts.len(), 4);
    }

    #[test]
    fn export_file_is_named_by_date() {
        let date = NaiveDate::from_ymd_opt(2025, 10, 19).unwrap();
        assert_eq!(export_file_name(date), "documents-2025-10-19.json");
    }

    #[tokio::test]
    async fn export_to_writes_dated_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut app = controller(FakeCloud::default(), ScriptedUi::default());
        app.submit_form(&form(Section::Shop21, "a"), None).await.unwrap();

        let path = app.export_to(dir.path()).unwrap();
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("documents-") && name.ends_with(".json"));
        let written: Vec<DocumentRecord> =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written.len(), 1);
    }
}
