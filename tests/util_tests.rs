use std::cmp::Ordering;

use asc_connect::asc::types::{CiBuildRun, CiProduct, ScmGitReference, ScmRepository};
use serde_json::json;

fn run(value: serde_json::Value) -> CiBuildRun {
    serde_json::from_value(value).unwrap()
}

#[test]
fn pretty_status_prefers_completion_then_progress() {
    let done = run(json!({"type": "ciBuildRuns", "id": "1", "attributes": {
        "executionProgress": "COMPLETE", "completionStatus": "FAILED"
    }}));
    assert_eq!(asc_connect::pretty_run_status(&done), "FAILED");

    let running = run(json!({"type": "ciBuildRuns", "id": "2", "attributes": {"executionProgress": "RUNNING"}}));
    assert_eq!(asc_connect::pretty_run_status(&running), "RUNNING");

    let bare = run(json!({"type": "ciBuildRuns", "id": "3"}));
    assert_eq!(asc_connect::pretty_run_status(&bare), "UNKNOWN");
}

#[test]
fn unknown_statuses_do_not_break_decoding() {
    let r = run(json!({"type": "ciBuildRuns", "id": "1", "attributes": {"completionStatus": "SOMETHING_NEW"}}));
    assert_eq!(asc_connect::pretty_run_status(&r), "UNKNOWN");
}

#[test]
fn resource_name_and_id_fallbacks() {
    let named: CiProduct =
        serde_json::from_value(json!({"type": "ciProducts", "id": "abc", "attributes": {"name": "My Name"}})).unwrap();
    assert_eq!(asc_connect::resource_name(&named), "My Name");
    assert_eq!(asc_connect::resource_id(&named), "abc");

    let reference: ScmGitReference = serde_json::from_value(
        json!({"type": "scmGitReferences", "id": "def", "attributes": {"canonicalName": "refs/heads/main"}}),
    )
    .unwrap();
    assert_eq!(asc_connect::resource_name(&reference), "refs/heads/main");

    let repo: ScmRepository = serde_json::from_value(json!({"type": "scmRepositories", "id": "r1", "attributes": {
        "ownerName": "acme", "repositoryName": "app"
    }}))
    .unwrap();
    assert_eq!(asc_connect::resource_name(&repo), "acme/app");

    let anonymous: CiProduct = serde_json::from_value(json!({"type": "ciProducts", "id": "ghi"})).unwrap();
    assert_eq!(asc_connect::resource_name(&anonymous), "ghi");
}

#[test]
fn branch_detection() {
    let git_ref = |attributes: serde_json::Value| -> ScmGitReference {
        serde_json::from_value(json!({"type": "scmGitReferences", "id": "ref", "attributes": attributes})).unwrap()
    };
    assert!(asc_connect::is_branch_git_ref(&git_ref(json!({"canonicalName": "refs/heads/main"}))));
    assert!(asc_connect::is_branch_git_ref(&git_ref(json!({"kind": "BRANCH", "name": "dev"}))));
    assert!(!asc_connect::is_branch_git_ref(&git_ref(json!({"canonicalName": "refs/tags/1.0.0"}))));
    assert!(!asc_connect::is_branch_git_ref(&git_ref(json!({"kind": "TAG", "canonicalName": "refs/heads/odd"}))));
}

#[test]
fn runs_sort_newest_first() {
    let older = run(json!({"type": "ciBuildRuns", "id": "1", "attributes": {"number": 1, "createdDate": "2025-01-01T00:00:00Z"}}));
    let newer = run(json!({"type": "ciBuildRuns", "id": "2", "attributes": {"number": 2, "createdDate": "2025-02-01T00:00:00Z"}}));
    let undated = run(json!({"type": "ciBuildRuns", "id": "3", "attributes": {"number": 3}}));
    assert_eq!(asc_connect::compare_runs_desc(&older, &newer), Ordering::Greater);

    let mut runs = vec![undated, older, newer];
    runs.sort_by(asc_connect::compare_runs_desc);
    let ids: Vec<_> = runs.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, ["2", "1", "3"]);
}
