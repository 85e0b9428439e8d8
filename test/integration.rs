// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use crate::{
    run, FakeRegistry, FakeScheduler, FakeTracker, RepoFixture, StoreFixture, DONE_COLUMN_ID,
    TODO_COLUMN_ID,
};

use reposync::{
    action::{
        job::{render_job, AssumeYes},
        Action,
    },
    descriptor::JenkinsConfig,
    resolve::Skip,
    sync::{sync, Clients, SyncError},
};

use anyhow::Result;
use indicatif::ProgressBar;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Mutex;

const FOLDER: [&str; 2] = ["GSS_data", "Housing"];

/// Two records of family "Housing", one of "Health", one without a single
/// producer.
fn housing_registry() -> FakeRegistry {
    let registry = FakeRegistry::new();
    registry.add_source(
        "rec1",
        json!({
            "Name": "House prices",
            "Producer": ["recP"],
            "Family": ["recF"],
            "Data type": ["recT"],
            "Landing Page": "https://a",
            "BA Stage": "To Do",
        }),
    );
    registry.add_source(
        "rec2",
        json!({"Name": "Rents", "Producer": ["recW"], "Family": ["recF"], "BA Stage": "Backlog"}),
    );
    registry.add_source(
        "rec3",
        json!({"Name": "Hospital beds", "Producer": ["recP"], "Family": ["recG"]}),
    );
    registry.add_source(
        "rec4",
        json!({"Name": "Shared", "Producer": ["recP", "recW"], "Family": ["recF"]}),
    );
    registry
}

fn connected_family(store: &StoreFixture) -> Result<()> {
    store.write_family(json!({
        "family": "Housing",
        "github": {"repo": "gss/family-housing", "project": "Housing pipelines"},
        "jenkins": {"base": "https://ci.example.org", "path": FOLDER},
    }))
}

fn snapshot_files(store: &StoreFixture) -> Result<Vec<String>> {
    ["info.json", "ONS-House-prices/info.json", "WG-Rents/info.json"]
        .iter()
        .map(|path| store.read(path))
        .collect()
}

#[tokio::test]
async fn first_run_builds_directories_and_family_descriptor() -> Result<()> {
    let store = StoreFixture::new()?;
    let registry = housing_registry();

    let report = run(&store.settings(), &registry, None, None, &AssumeYes).await?;

    assert_eq!(report.pipelines, vec!["ONS-House-prices", "WG-Rents"]);
    assert_eq!(report.created, vec!["ONS-House-prices", "WG-Rents"]);
    assert_eq!(report.skipped.len(), 1);
    assert!(!report.has_failures());
    assert!(!store.root.join("ONS-Hospital-beds").exists());

    assert_eq!(
        store.json("info.json")?,
        json!({"family": "Housing", "pipelines": ["ONS-House-prices", "WG-Rents"]})
    );
    assert_eq!(
        store.json("ONS-House-prices/info.json")?,
        json!({
            "title": "House prices",
            "publisher": "Office for National Statistics",
            "description": "",
            "landingPage": "https://a",
            "published": "",
            "families": ["Housing"],
            "extract": {"source": "Spreadsheet", "stage": "To Do"},
            "transform": {"airtable": "rec1"},
            "sizingNotes": "",
            "notes": "",
        })
    );

    let text = store.read("ONS-House-prices/info.json")?;
    assert!(text.starts_with("{\n    \"description\": \"\",\n    \"extract\": {\n        "));
    assert!(text.ends_with("}\n"));

    Ok(())
}

#[tokio::test]
async fn second_run_changes_nothing() -> Result<()> {
    let store = StoreFixture::new()?;
    let registry = housing_registry();

    run(&store.settings(), &registry, None, None, &AssumeYes).await?;
    let before = snapshot_files(&store)?;
    let report = run(&store.settings(), &registry, None, None, &AssumeYes).await?;

    assert_eq!(snapshot_files(&store)?, before);
    assert!(report.created.is_empty());

    Ok(())
}

#[tokio::test]
async fn renamed_record_keeps_its_directory() -> Result<()> {
    let store = StoreFixture::new()?;
    let registry = housing_registry();

    run(&store.settings(), &registry, None, None, &AssumeYes).await?;
    registry.set_field("rec1", "Name", json!("House prices (revised)"));
    let report = run(&store.settings(), &registry, None, None, &AssumeYes).await?;

    assert_eq!(report.pipelines, vec!["ONS-House-prices", "WG-Rents"]);
    assert!(!store.root.join("ONS-House-prices-revised").exists());
    assert_eq!(
        store.json("ONS-House-prices/info.json")?["title"],
        "House prices (revised)"
    );

    Ok(())
}

#[tokio::test]
async fn records_sharing_a_directory_are_folded() -> Result<()> {
    let store = StoreFixture::new()?;
    let registry = FakeRegistry::new();
    for (id, landing_page) in [("rec1", "https://b"), ("rec5", "https://a")] {
        registry.add_source(
            id,
            json!({
                "Name": "House prices",
                "Producer": ["recP"],
                "Family": ["recF"],
                "Landing Page": landing_page,
            }),
        );
    }

    run(&store.settings(), &registry, None, None, &AssumeYes).await?;
    let first = store.json("ONS-House-prices/info.json")?;
    run(&store.settings(), &registry, None, None, &AssumeYes).await?;
    let second = store.json("ONS-House-prices/info.json")?;

    assert_eq!(first["landingPage"], json!(["https://a", "https://b"]));
    assert_eq!(first["transform"]["airtable"], json!(["rec1", "rec5"]));
    assert_eq!(second, first);

    Ok(())
}

#[tokio::test]
async fn local_edits_survive_sync() -> Result<()> {
    let store = StoreFixture::new()?;
    let registry = housing_registry();
    store.write(
        "ONS-old-name/info.json",
        &json!({
            "title": "Old title",
            "contact": "someone@example.org",
            "transform": {"airtable": "rec1", "columns": ["Year"], "main_issue": 9},
        })
        .to_string(),
    )?;

    let report = run(&store.settings(), &registry, None, None, &AssumeYes).await?;
    let descriptor = store.json("ONS-old-name/info.json")?;

    assert_eq!(report.pipelines, vec!["ONS-old-name", "WG-Rents"]);
    assert!(!store.root.join("ONS-House-prices").exists());
    assert_eq!(descriptor["title"], "House prices");
    assert_eq!(descriptor["contact"], "someone@example.org");
    assert_eq!(descriptor["transform"]["columns"], json!(["Year"]));
    assert_eq!(descriptor["transform"]["main_issue"], 9);

    Ok(())
}

#[tokio::test]
async fn local_edits_survive_in_nested_directory() -> Result<()> {
    let store = StoreFixture::new()?;
    let registry = FakeRegistry::new();
    registry.add_source(
        "rec9",
        json!({"Name": "Income/expenditure", "Producer": ["recP"], "Family": ["recF"]}),
    );

    run(&store.settings(), &registry, None, None, &AssumeYes).await?;
    let mut descriptor = store.json("ONS-Income/expenditure/info.json")?;
    descriptor["contact"] = json!("someone@example.org");
    descriptor["transform"]["main_issue"] = json!(42);
    store.write("ONS-Income/expenditure/info.json", &descriptor.to_string())?;

    let report = run(&store.settings(), &registry, None, None, &AssumeYes).await?;
    let descriptor = store.json("ONS-Income/expenditure/info.json")?;

    assert_eq!(report.pipelines, vec!["ONS-Income/expenditure"]);
    assert!(report.created.is_empty());
    assert_eq!(descriptor["contact"], "someone@example.org");
    assert_eq!(descriptor["transform"]["main_issue"], 42);
    assert_eq!(descriptor["transform"]["airtable"], "rec9");

    Ok(())
}

#[tokio::test]
async fn undecodable_record_is_skipped_alone() -> Result<()> {
    let store = StoreFixture::new()?;
    let registry = housing_registry();

    run(&store.settings(), &registry, None, None, &AssumeYes).await?;
    let before = store.read("WG-Rents/info.json")?;
    registry.set_field("rec2", "GitHub Issue", json!("twelve"));
    registry.set_field("rec1", "Description", json!("Median prices"));
    let report = run(&store.settings(), &registry, None, None, &AssumeYes).await?;

    assert!(!report.has_failures());
    assert_eq!(report.pipelines, vec!["ONS-House-prices", "WG-Rents"]);
    assert!(report.skipped.iter().any(
        |skip| matches!(skip, Skip::Malformed { record, .. } if record == "rec2")
    ));
    assert_eq!(store.read("WG-Rents/info.json")?, before);
    assert_eq!(
        store.json("ONS-House-prices/info.json")?["description"],
        "Median prices"
    );

    Ok(())
}

#[tokio::test]
async fn unreadable_descriptor_is_never_overwritten() -> Result<()> {
    let store = StoreFixture::new()?;
    let registry = housing_registry();
    store.write("ONS-House-prices/info.json", "{ not json")?;

    let report = run(&store.settings(), &registry, None, None, &AssumeYes).await?;

    assert_eq!(store.read("ONS-House-prices/info.json")?, "{ not json");
    assert_eq!(report.unreadable, vec!["ONS-House-prices"]);
    assert_eq!(report.pipelines, vec!["ONS-House-prices", "WG-Rents"]);

    Ok(())
}

#[tokio::test]
async fn duplicate_link_keeps_first_directory() -> Result<()> {
    let store = StoreFixture::new()?;
    let registry = FakeRegistry::new();
    registry.add_source(
        "rec1",
        json!({"Name": "House prices", "Producer": ["recP"], "Family": ["recF"]}),
    );
    let ignored = json!({"title": "Ignored", "transform": {"airtable": "rec1"}}).to_string();
    store.write(
        "A-first/info.json",
        &json!({"title": "Kept", "transform": {"airtable": "rec1"}}).to_string(),
    )?;
    store.write("B-second/info.json", &ignored)?;

    let report = run(&store.settings(), &registry, None, None, &AssumeYes).await?;

    assert_eq!(report.pipelines, vec!["A-first"]);
    assert_eq!(store.json("A-first/info.json")?["title"], "House prices");
    assert_eq!(store.read("B-second/info.json")?, ignored);

    Ok(())
}

#[tokio::test]
async fn family_comes_from_family_descriptor() -> Result<()> {
    let store = StoreFixture::new()?;
    let registry = housing_registry();
    store.write_family(json!({"family": "Housing", "maintainer": "data team"}))?;
    let mut settings = store.settings();
    settings.family = None;

    let report = run(&settings, &registry, None, None, &AssumeYes).await?;

    assert_eq!(report.family, "Housing");
    assert_eq!(
        store.json("info.json")?,
        json!({
            "family": "Housing",
            "maintainer": "data team",
            "pipelines": ["ONS-House-prices", "WG-Rents"],
        })
    );

    Ok(())
}

#[tokio::test]
async fn missing_or_unknown_family_is_rejected() -> Result<()> {
    let store = StoreFixture::new()?;
    let registry = housing_registry();

    let mut settings = store.settings();
    settings.family = None;
    let result = run(&settings, &registry, None, None, &AssumeYes).await;
    assert!(matches!(result, Err(SyncError::NoFamily { .. })));

    settings.family = Some("Hosuing".into());
    let result = run(&settings, &registry, None, None, &AssumeYes).await;
    match result {
        Err(SyncError::UnknownFamily { available, .. }) => {
            assert_eq!(available, vec!["Housing", "Health"]);
        }
        other => panic!("expected unknown family, got {other:?}"),
    }
    assert!(!store.root.exists());

    Ok(())
}

#[tokio::test]
async fn registry_failure_writes_nothing() -> Result<()> {
    let store = StoreFixture::new()?;
    let registry = FakeRegistry::offline();

    let result = run(&store.settings(), &registry, None, None, &AssumeYes).await;

    assert!(matches!(result, Err(SyncError::Snapshot(_))));
    assert!(!store.root.exists());

    Ok(())
}

#[tokio::test]
async fn dry_run_only_plans_remote_actions() -> Result<()> {
    let store = StoreFixture::new()?;
    connected_family(&store)?;
    let registry = housing_registry();
    let tracker = FakeTracker::new();
    let scheduler = FakeScheduler::default();

    let report = run(
        &store.settings(),
        &registry,
        Some(&tracker),
        Some(&scheduler),
        &AssumeYes,
    )
    .await?;

    assert!(report.actions.contains(&Action::CreateIssue {
        repo: "gss/family-housing".into(),
        title: "House prices".into(),
    }));
    assert!(report.actions.contains(&Action::CreateJob {
        name: "ONS-House-prices".into(),
    }));
    assert_eq!(tracker.issue_count(), 0);
    assert!(scheduler.created.lock().unwrap().is_empty());
    assert_eq!(registry.update_count(), 0);
    assert!(store.root.join("ONS-House-prices/info.json").exists());
    assert_eq!(
        store.json("ONS-House-prices/info.json")?["transform"].get("main_issue"),
        None
    );

    Ok(())
}

#[tokio::test]
async fn writeback_links_issue_board_registry_and_job() -> Result<()> {
    let store = StoreFixture::new()?;
    connected_family(&store)?;
    let registry = FakeRegistry::new();
    registry.add_source(
        "rec1",
        json!({
            "Name": "House prices",
            "Producer": ["recP"],
            "Family": ["recF"],
            "Landing Page": "https://a",
            "BA Stage": "To Do",
        }),
    );
    let tracker = FakeTracker::new();
    let scheduler = FakeScheduler::default();
    let mut settings = store.settings();
    settings.writeback.github = true;
    settings.writeback.jenkins = true;
    settings.writeback.airtable = true;

    let report = run(&settings, &registry, Some(&tracker), Some(&scheduler), &AssumeYes).await?;
    assert!(!report.has_failures());

    let issue = tracker.titled("House prices").expect("issue created");
    assert_eq!(issue.labels, vec!["To Do"]);
    assert_eq!(tracker.column(TODO_COLUMN_ID), vec![issue.number]);
    assert_eq!(registry.update_count(), 1);
    assert_eq!(
        store.json("ONS-House-prices/info.json")?["transform"]["main_issue"],
        issue.number
    );

    let job = scheduler.job(&FOLDER, "ONS-House-prices").expect("job created");
    assert!(job.contains("<url>https://github.com/gss/family-housing.git</url>"));

    let report = run(&settings, &registry, Some(&tracker), Some(&scheduler), &AssumeYes).await?;
    assert_eq!(report.actions, Vec::new());
    assert_eq!(tracker.issue_count(), 1);
    assert_eq!(registry.update_count(), 1);

    Ok(())
}

#[tokio::test]
async fn labels_follow_stage_tags() -> Result<()> {
    let store = StoreFixture::new()?;
    connected_family(&store)?;
    let registry = housing_registry();
    let tracker = FakeTracker::new();
    tracker.push_issue("House prices", &["Backlog", "help wanted"], true);
    let mut settings = store.settings();
    settings.writeback.github = true;

    run(&settings, &registry, Some(&tracker), None, &AssumeYes).await?;

    let issue = tracker.titled("House prices").expect("issue kept");
    assert_eq!(issue.labels, vec!["help wanted", "To Do"]);
    assert_eq!(tracker.issue_count(), 2);

    Ok(())
}

#[tokio::test]
async fn closed_or_carded_issues_stay_off_the_board() -> Result<()> {
    let store = StoreFixture::new()?;
    connected_family(&store)?;
    let registry = housing_registry();
    registry.set_field("rec2", "BA Stage", json!("To Do"));
    let tracker = FakeTracker::new();
    let carded = tracker.push_issue("House prices", &["To Do"], true);
    tracker.put_card(DONE_COLUMN_ID, carded.number);
    tracker.push_issue("Rents", &["To Do"], false);
    let mut settings = store.settings();
    settings.writeback.github = true;

    run(&settings, &registry, Some(&tracker), None, &AssumeYes).await?;

    assert_eq!(tracker.column(TODO_COLUMN_ID), Vec::<u64>::new());

    Ok(())
}

#[tokio::test]
async fn failing_dataset_does_not_stop_others() -> Result<()> {
    let store = StoreFixture::new()?;
    connected_family(&store)?;
    let registry = housing_registry();
    let tracker = FakeTracker::failing_on("House prices");
    let mut settings = store.settings();
    settings.writeback.github = true;

    let report = run(&settings, &registry, Some(&tracker), None, &AssumeYes).await?;

    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].dir, "ONS-House-prices");
    assert!(tracker.titled("Rents").is_some());
    assert_eq!(report.pipelines, vec!["ONS-House-prices", "WG-Rents"]);
    assert!(store.root.join("ONS-House-prices/info.json").exists());

    Ok(())
}

#[tokio::test]
async fn drifted_job_is_reconfigured_only_when_confirmed() -> Result<()> {
    let store = StoreFixture::new()?;
    connected_family(&store)?;
    let registry = housing_registry();
    let scheduler = FakeScheduler::default();
    let stale = "<flow-definition><description>old</description></flow-definition>";
    scheduler.put_job(&FOLDER, "ONS-House-prices", stale);
    let mut settings = store.settings();
    settings.writeback.jenkins = true;

    let report = run(&settings, &registry, None, Some(&scheduler), &crate::Deny).await?;
    assert!(!report.actions.contains(&Action::ReconfigureJob {
        name: "ONS-House-prices".into()
    }));
    assert_eq!(scheduler.job(&FOLDER, "ONS-House-prices").as_deref(), Some(stale));

    run(&settings, &registry, None, Some(&scheduler), &AssumeYes).await?;
    assert_eq!(
        *scheduler.reconfigured.lock().unwrap(),
        vec!["ONS-House-prices".to_string()]
    );

    Ok(())
}

#[tokio::test]
async fn reformatted_job_is_not_drift() -> Result<()> {
    let store = StoreFixture::new()?;
    connected_family(&store)?;
    let registry = housing_registry();
    let scheduler = FakeScheduler::default();
    let url = "https://github.com/gss/family-housing.git";
    for dir in ["ONS-House-prices", "WG-Rents"] {
        let config = render_job(url, dir)
            .replace("\n  ", "\n")
            .replace("<properties/>", "<properties />")
            .replace("<extensions/>", "<extensions></extensions><!-- saved by Jenkins -->")
            .replace("<name>*/master</name>", "<name><![CDATA[*/master]]></name>");
        scheduler.put_job(&FOLDER, dir, &config);
    }
    let mut settings = store.settings();
    settings.writeback.jenkins = true;

    let report = run(&settings, &registry, None, Some(&scheduler), &AssumeYes).await?;

    assert_eq!(report.actions, Vec::new());
    assert!(scheduler.reconfigured.lock().unwrap().is_empty());

    Ok(())
}

#[tokio::test]
async fn job_repository_falls_back_to_origin_remote() -> Result<()> {
    let store = StoreFixture::new()?;
    let workspace = store.root.parent().expect("store has a parent");
    let _repo = RepoFixture::new(workspace, "https://example.org/gss/family-housing.git")?;
    store.write_family(json!({
        "family": "Housing",
        "jenkins": {"base": "https://ci.example.org", "path": FOLDER},
    }))?;
    let registry = housing_registry();
    let scheduler = FakeScheduler::default();
    let mut settings = store.settings();
    settings.writeback.jenkins = true;

    run(&settings, &registry, None, Some(&scheduler), &AssumeYes).await?;

    let job = scheduler.job(&FOLDER, "WG-Rents").expect("job created");
    assert!(job.contains("<url>https://example.org/gss/family-housing.git</url>"));

    Ok(())
}

#[tokio::test]
async fn scheduler_connects_once_with_family_jenkins_config() -> Result<()> {
    let store = StoreFixture::new()?;
    connected_family(&store)?;
    let registry = housing_registry();
    let scheduler = FakeScheduler::default();
    let connected = Mutex::new(Vec::new());
    let clients = Clients {
        registry: &registry,
        issues: None::<&FakeTracker>,
        jobs: Some(|config: &JenkinsConfig| {
            connected.lock().unwrap().push(config.base.clone());
            &scheduler
        }),
    };

    let report = sync(&store.settings(), clients, &AssumeYes, &ProgressBar::hidden()).await?;

    assert_eq!(*connected.lock().unwrap(), vec!["https://ci.example.org".to_string()]);
    assert!(report.actions.contains(&Action::CreateJob {
        name: "WG-Rents".into()
    }));

    Ok(())
}

#[tokio::test]
async fn assets_are_copied_without_overwrite() -> Result<()> {
    let store = StoreFixture::new()?;
    let assets = store.root.with_file_name("assets");
    std::fs::create_dir_all(assets.join("css"))?;
    std::fs::write(assets.join("index.html"), "<html/>")?;
    std::fs::write(assets.join("css/site.css"), "body {}")?;
    store.write("index.html", "custom")?;
    let registry = housing_registry();
    let mut settings = store.settings();
    settings.assets_dir = assets;

    let report = run(&settings, &registry, None, None, &AssumeYes).await?;

    assert_eq!(store.read("index.html")?, "custom");
    assert_eq!(store.read("css/site.css")?, "body {}");
    assert_eq!(report.assets, vec![store.root.join("css/site.css")]);

    Ok(())
}
