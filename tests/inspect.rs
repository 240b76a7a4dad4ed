//! Integration tests for inspecting rendered templates on disk
//!
//! Synthesize, save, reload, then validate and diff the way a deploy
//! pipeline would between two revisions of the stack.

use coco_stack::annotator;
use coco_stack::config::{StackConfig, Variant};
use coco_stack::diff::{self, Change};
use coco_stack::template::Template;
use coco_stack::validate::{self, Expectations, Severity};
use serde_json::json;
use tempfile::TempDir;

fn saved(dir: &TempDir, name: &str, config: &StackConfig) -> Template {
    let path = dir.path().join(name);
    annotator::synth(config).unwrap().save(&path).unwrap();
    Template::load(&path).unwrap()
}

// =============================================================================
// Save / Load
// =============================================================================

#[test]
fn test_saved_template_reloads_identically() {
    let dir = TempDir::new().unwrap();
    let config = StackConfig::preset(Variant::Extended);
    let reloaded = saved(&dir, "cdk.out/CocoAnnotatorStack.template.json", &config);
    assert_eq!(reloaded, annotator::synth(&config).unwrap());
}

#[test]
fn test_load_reports_bad_json() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("broken.json");
    std::fs::write(&path, "{ not json").unwrap();
    let err = Template::load(&path).unwrap_err();
    assert!(err.to_string().contains("Failed to parse template"));
}

// =============================================================================
// Validation
// =============================================================================

#[test]
fn test_reloaded_template_validates() {
    let dir = TempDir::new().unwrap();
    let config = StackConfig::preset(Variant::Base).with_overrides(None, None, Some("eu-west-1".into()));
    let template = saved(&dir, "base.json", &config);
    assert!(validate::validate(&template, &config.expectations()).is_empty());
}

#[test]
fn test_base_template_fails_extended_expectations() {
    let template = annotator::synth(&StackConfig::preset(Variant::Base)).unwrap();
    let expect = StackConfig::preset(Variant::Extended).expectations();
    let findings = validate::validate(&template, &expect);

    let codes: Vec<&str> = findings.iter().map(|f| f.code).collect();
    assert!(codes.contains(&"ingress-rules"));
    assert!(codes.contains(&"instance-subnet"));
    assert!(findings.iter().all(|f| f.severity == Severity::Error));
}

#[test]
fn test_tampered_template_is_caught() {
    let mut template = annotator::synth(&StackConfig::default()).unwrap();
    let volume_id = template
        .resources_of_type("AWS::EC2::Volume")
        .map(|(id, _)| id.clone())
        .next()
        .unwrap();
    template
        .resources
        .get_mut(&volume_id)
        .unwrap()
        .properties
        .insert("AvailabilityZone".into(), json!(""));
    let role_id = template
        .resources_of_type("AWS::IAM::Role")
        .map(|(id, _)| id.clone())
        .find(|id| id.starts_with("cocoannotatorrole"))
        .unwrap();
    template.resources.get_mut(&role_id).unwrap().properties.insert(
        "AssumeRolePolicyDocument".into(),
        json!({ "Statement": [{ "Effect": "Allow", "Principal": { "AWS": "*" } }] }),
    );

    let findings = validate::validate(&template, &Expectations::default());
    let codes: Vec<&str> = findings.iter().map(|f| f.code).collect();
    assert_eq!(codes, vec!["volume-zone", "trust-policy"]);
}

#[test]
fn test_foreign_account_trust_is_caught() {
    let config = StackConfig::default().with_overrides(None, Some("123456789012".into()), None);
    let synthesized = annotator::synth(&config).unwrap();
    assert!(validate::validate(&synthesized, &config.expectations()).is_empty());

    let role_id = synthesized
        .resources_of_type("AWS::IAM::Role")
        .map(|(id, _)| id.clone())
        .find(|id| id.starts_with("cocoannotatorrole"))
        .unwrap();
    for principal in ["arn:aws:iam::999999999999:root", "arn:aws:iam::*:root"] {
        let mut template = synthesized.clone();
        template.resources.get_mut(&role_id).unwrap().properties.insert(
            "AssumeRolePolicyDocument".into(),
            json!({ "Statement": [{ "Effect": "Allow", "Principal": { "AWS": principal } }] }),
        );
        let findings = validate::validate(&template, &config.expectations());
        let codes: Vec<&str> = findings.iter().map(|f| f.code).collect();
        assert_eq!(codes, vec!["trust-policy"], "{}", principal);
    }
}

// =============================================================================
// Diff
// =============================================================================

#[test]
fn test_redeploying_same_config_changes_nothing() {
    let dir = TempDir::new().unwrap();
    let config = StackConfig::default();
    let deployed = saved(&dir, "deployed.json", &config);
    assert!(diff::diff(&deployed, &annotator::synth(&config).unwrap()).is_empty());
}

#[test]
fn test_upgrade_base_to_extended() {
    let dir = TempDir::new().unwrap();
    let deployed = saved(&dir, "deployed.json", &StackConfig::preset(Variant::Base));
    let desired = annotator::synth(&StackConfig::preset(Variant::Extended)).unwrap();
    let changes = diff::diff(&deployed, &desired);

    let (volume_id, _) = desired.resources_of_type("AWS::EC2::Volume").next().unwrap();
    let volume = &changes.resources[volume_id];
    assert_eq!(volume.change, Change::Modified);
    assert!(!volume.replacement);
    assert_eq!(volume.properties[0].after, Some(json!(100)));

    let (instance_id, _) = desired.resources_of_type("AWS::EC2::Instance").next().unwrap();
    let (bucket_id, _) = desired.resources_of_type("AWS::S3::Bucket").next().unwrap();
    let replaced = changes.replacements();
    assert!(replaced.contains(&instance_id.as_str()));
    assert!(replaced.contains(&bucket_id.as_str()));

    assert_eq!(changes.outputs.get("InstancePublicIp"), Some(&Change::Added));
}

#[test]
fn test_renaming_stack_keeps_logical_ids() {
    let before = annotator::synth(&StackConfig::default()).unwrap();
    let after = annotator::synth(&StackConfig::default().with_overrides(Some("Other".into()), None, None))
        .unwrap();
    let before_ids: Vec<_> = before.resources.keys().collect();
    let after_ids: Vec<_> = after.resources.keys().collect();
    assert_eq!(before_ids, after_ids);
}
