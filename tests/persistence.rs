mod common;

use common::*;
use std::fs;
use std::sync::Arc;
use uuid::Uuid;

use slawizard::check::{ResultData, ResultValue, Scalar};
use slawizard::persistence::{write_atomic, RunIdentity, DIGEST_KEY};
use slawizard::{
    CheckGroup, Configuration, Hardware, HwConfigStore, PrinterError, ResultDocument, ResultStore,
    RuntimeConfig, Wizard, WizardCheckType, WizardDataPackage, WizardHooks, WizardId, WizardState,
};

fn sample_data() -> ResultData {
    let mut data = ResultData::new();
    data.insert("towerHeight".into(), ResultValue::Int(128_000_000));
    data.insert("uvMeanCenter".into(), ResultValue::Float(142.5));
    data.insert("uvBoost".into(), ResultValue::Bool(false));
    data.insert("displayState".into(), ResultValue::Text("ok".into()));
    data.insert(
        "wizardUvPwms".into(),
        ResultValue::List(vec![Scalar::Int(190), Scalar::Int(200)]),
    );
    data
}

fn identity(rig: &Rig, id: WizardId) -> RunIdentity {
    RunIdentity::capture(id, rig.hw.as_ref(), Uuid::new_v4())
}

#[test]
fn test_document_round_trip() {
    let rig = Rig::new();
    let store = ResultStore::new(rig.dir.path());
    let data = sample_data();
    let doc = ResultDocument::new(&identity(&rig, WizardId::Calibration), &data)
        .expect("document");
    assert!(doc.verify());

    store.save(WizardId::Calibration, &doc).expect("save");
    let loaded = store
        .load(WizardId::Calibration)
        .expect("load")
        .expect("document present");

    assert_eq!(loaded, doc);
    assert!(loaded.verify());
    assert_eq!(loaded.identity("wizardId"), Some(WizardId::Calibration.name()));
    assert_eq!(loaded.identity("a64SerialNo"), Some(rig.hw.a64_serial().as_str()));
    assert!(loaded.get(DIGEST_KEY).is_some());
    let results = loaded.results();
    for (key, value) in &data {
        assert_eq!(results.get(key), Some(value), "{}", key);
    }
    assert!(!results.contains_key(DIGEST_KEY));
}

#[test]
fn test_tampered_document_fails_verification() {
    let rig = Rig::new();
    let store = ResultStore::new(rig.dir.path());
    let doc = ResultDocument::new(&identity(&rig, WizardId::Calibration), &sample_data())
        .expect("document");
    store.save(WizardId::Calibration, &doc).expect("save");

    let path = store.path(WizardId::Calibration);
    let raw = fs::read_to_string(&path).expect("read");
    fs::write(&path, raw.replace("128000000", "127000000")).expect("write");

    let loaded = store
        .load(WizardId::Calibration)
        .expect("load")
        .expect("document present");
    assert!(!loaded.verify());
}

#[test]
fn test_legacy_names_are_written_together() {
    let rig = Rig::new();
    let store = ResultStore::new(rig.dir.path());
    let doc = ResultDocument::new(&identity(&rig, WizardId::SelfTest), &sample_data())
        .expect("document");

    let written = store.save(WizardId::SelfTest, &doc).expect("save");

    assert_eq!(written.len(), 3);
    let names: Vec<String> = written
        .iter()
        .map(|p| p.file_name().expect("file name").to_string_lossy().into_owned())
        .collect();
    assert!(names.contains(&"wizard_data.json".to_string()));
    assert!(names.contains(&"thewizard_data.json".to_string()));
    let first = fs::read(&written[0]).expect("read");
    for path in &written[1..] {
        assert_eq!(fs::read(path).expect("read"), first);
    }

    // The loader falls back to a legacy name.
    fs::remove_file(store.path(WizardId::SelfTest)).expect("remove canonical");
    let loaded = store
        .load(WizardId::SelfTest)
        .expect("load")
        .expect("legacy document");
    assert!(loaded.verify());
}

#[test]
fn test_missing_document_loads_as_none() {
    let rig = Rig::new();
    let store = ResultStore::new(rig.dir.path());
    assert!(store.load(WizardId::UvCalibration).expect("load").is_none());
}

#[test]
fn test_identity_keys_cannot_be_overridden() {
    let rig = Rig::new();
    let id = identity(&rig, WizardId::SelfTest);

    let mut same = ResultData::new();
    same.insert("a64SerialNo".into(), rig.hw.a64_serial().into());
    assert!(ResultDocument::new(&id, &same).is_ok());

    let mut other = ResultData::new();
    other.insert("a64SerialNo".into(), "CZPX0000X000XC00000".into());
    assert_eq!(
        ResultDocument::new(&id, &other),
        Err(PrinterError::ResultKeyCollision {
            key: "a64SerialNo".into()
        })
    );

    let mut digest = ResultData::new();
    digest.insert(DIGEST_KEY.into(), "deadbeef".into());
    assert!(matches!(
        ResultDocument::new(&id, &digest),
        Err(PrinterError::ResultKeyCollision { .. })
    ));
}

#[test]
fn test_atomic_write_leaves_no_temp_file() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let path = dir.path().join("nested").join("doc.json");

    write_atomic(&path, b"{\"a\":1}").expect("first write");
    write_atomic(&path, b"{\"a\":2}").expect("second write");

    assert_eq!(fs::read_to_string(&path).expect("read"), "{\"a\":2}");
    let entries: Vec<_> = fs::read_dir(path.parent().expect("parent"))
        .expect("list")
        .collect();
    assert_eq!(entries.len(), 1);
}

#[tokio::test]
async fn test_finished_run_is_stored_once_with_its_identity() {
    let rig = Rig::new();
    let log = Arc::new(CheckLog::default());
    let groups = vec![CheckGroup::new(
        Configuration::ANY,
        vec![
            ScriptedCheck::new(WizardCheckType::TowerCalibration, &log)
                .emitting("towerHeight", 127_000_000)
                .boxed(),
            ScriptedCheck::new(WizardCheckType::TiltCalibration, &log)
                .emitting("tiltHeight", 4352)
                .boxed(),
        ],
    )];
    let wizard = Wizard::new(WizardId::Calibration, groups, rig.package()).without_results_screen();

    assert_eq!(run(&wizard).await, WizardState::Done);

    let doc = ResultStore::new(rig.dir.path())
        .load(WizardId::Calibration)
        .expect("load")
        .expect("stored document");
    assert!(doc.verify());
    assert_eq!(doc.identity("runId"), Some(wizard.run_id().to_string().as_str()));
    let results = doc.results();
    assert_eq!(results.get("towerHeight"), Some(&ResultValue::Int(127_000_000)));
    assert_eq!(results.get("tiltHeight"), Some(&ResultValue::Int(4352)));
    assert_eq!(wizard.data().len(), 2);

    // A second run of the same wizard object is a no-op.
    assert_eq!(run(&wizard).await, WizardState::Done);
}

/// Stages a config change when the run finishes.
struct MarkCalibrated;

impl WizardHooks for MarkCalibrated {
    fn wizard_finished(&self, package: &WizardDataPackage) -> Result<(), PrinterError> {
        package.config_writer.update(|config| config.calibrated = true);
        Ok(())
    }
}

fn calibration_groups(log: &Arc<CheckLog>) -> Vec<CheckGroup> {
    vec![CheckGroup::single(
        Configuration::ANY,
        ScriptedCheck::new(WizardCheckType::TowerCalibration, log)
            .emitting("towerHeight", 127_000_000)
            .boxed(),
    )]
}

#[tokio::test]
async fn test_unwritable_results_leave_config_untouched() {
    let rig = Rig::new();
    let blocker = rig.dir.path().join("blocker");
    fs::write(&blocker, b"").expect("write blocker");
    let config_path = rig.dir.path().join("hardware.yaml");
    let store = Arc::new(HwConfigStore::open(&config_path, None).expect("open store"));
    let package = WizardDataPackage::new(
        rig.hw.clone(),
        store.writer(),
        RuntimeConfig::testing(blocker.join("data")),
    );
    let log = Arc::new(CheckLog::default());
    let wizard = Wizard::new(WizardId::Calibration, calibration_groups(&log), package)
        .without_results_screen()
        .with_hooks(MarkCalibrated);

    assert_eq!(run(&wizard).await, WizardState::Failed);

    assert!(matches!(
        wizard.exception(),
        Some(PrinterError::FailedToSaveWizardData { .. })
    ));
    assert!(!store.get().calibrated);
    assert!(!config_path.exists());
}

#[tokio::test]
async fn test_failed_config_commit_removes_stored_results() {
    let rig = Rig::new();
    let blocker = rig.dir.path().join("blocker");
    fs::write(&blocker, b"").expect("write blocker");
    let store = Arc::new(HwConfigStore::open(blocker.join("hardware.yaml"), None).expect("open store"));
    let package = WizardDataPackage::new(rig.hw.clone(), store.writer(), rig.runtime());
    let log = Arc::new(CheckLog::default());
    let wizard = Wizard::new(WizardId::Calibration, calibration_groups(&log), package)
        .without_results_screen()
        .with_hooks(MarkCalibrated);

    assert_eq!(run(&wizard).await, WizardState::Failed);

    assert!(matches!(
        wizard.exception(),
        Some(PrinterError::FailedToSaveConfig { .. })
    ));
    assert!(!store.get().calibrated);
    let results = ResultStore::new(rig.dir.path());
    assert!(results.load(WizardId::Calibration).expect("load").is_none());
    assert!(results.paths(WizardId::Calibration).iter().all(|p| !p.exists()));
}

#[test]
fn test_remove_clears_every_name() {
    let rig = Rig::new();
    let store = ResultStore::new(rig.dir.path());
    let doc = ResultDocument::new(&identity(&rig, WizardId::SelfTest), &sample_data())
        .expect("document");
    store.save(WizardId::SelfTest, &doc).expect("save");
    fs::remove_file(store.path(WizardId::SelfTest)).expect("remove canonical");

    store.remove(WizardId::SelfTest).expect("remove");
    store.remove(WizardId::SelfTest).expect("second remove is a no-op");

    assert!(store.paths(WizardId::SelfTest).iter().all(|p| !p.exists()));
}
