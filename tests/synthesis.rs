//! End-to-end synthesis against a prebuilt generated tree
//!
//! The fixture mimics the generator output for google-cloud-dialogflow v2
//! and the run uses the built-in synth config.

use gapic_synth::{
    check_idempotence, load_builtin, synthesize, CopyError, PrebuiltGenerator, SynthError,
};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const CLIENT_DIR: &str = "lib/google/cloud/dialogflow/v2";

const AGENTS_CLIENT: &str = r#"require "google/gax"

module Google
  module Cloud
    module Dialogflow
      module V2
        class AgentsClient
          attr_reader :agents_stub

          SERVICE_ADDRESS = "dialogflow.googleapis.com".freeze
        end
      end
    end
  end
end
"#;

const INTENTS_CLIENT: &str = r#"require "google/gax"

module Google
  module Cloud
    module Dialogflow
      module V2
        class IntentsClient

          # @private
          class OperationsClient < Google::Longrunning::OperationsClient
            SERVICE_ADDRESS = "dialogflow.googleapis.com".freeze
          end
        end
      end
    end
  end
end
"#;

const ENTRYPOINT: &str = r#"# Copyright 2018 Google LLC
#
# Licensed under the Apache License, Version 2.0 (the "License");

require "google/gax"

# See https://github.com/GoogleCloudPlatform/google-cloud-ruby for details.
module Google
end
"#;

const GENERATED_GEMSPEC: &str = r#"Gem::Specification.new do |gem|
  gem.name          = "google-cloud-dialogflow"
  gem.version       = "0.1.0"

  gem.add_dependency "google-gax", "~> 1.3"

  gem.add_development_dependency "minitest", "~> 5.10"
  gem.add_development_dependency "rubocop", "~> 0.50.0"
end
"#;

const EXISTING_GEMSPEC: &str = r#"Gem::Specification.new do |gem|
  gem.name          = "google-cloud-dialogflow"
  gem.version       = "0.2.3"

  gem.add_dependency "google-gax", "~> 1.0"
  gem.add_dependency "grpc-google-iam-v1", "~> 0.6.9"
end
"#;

fn write(root: &Path, relative: &str, content: &str) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

/// Generated tree and an existing destination with a hand-edited gemspec.
fn setup() -> (TempDir, TempDir) {
    let generated = TempDir::new().unwrap();
    let root = generated.path();
    write(root, &format!("{CLIENT_DIR}/agents_client.rb"), AGENTS_CLIENT);
    write(
        root,
        &format!("{CLIENT_DIR}/intents_client.rb"),
        &INTENTS_CLIENT.replace("          # @private\n", ""),
    );
    write(root, "lib/google/cloud/dialogflow.rb", ENTRYPOINT);
    write(
        root,
        "test/google/cloud/dialogflow/v2/agents_client_test.rb",
        "require \"minitest/autorun\"\n",
    );
    write(
        root,
        "README.md",
        "See https://googlecloudplatform.github.io/google-cloud-ruby/#/docs\n",
    );
    write(root, "LICENSE", "Apache License\n");
    write(root, ".gitignore", "Gemfile.lock\n");
    write(root, ".yardopts", "--markup markdown\n");
    write(root, "google-cloud-dialogflow.gemspec", GENERATED_GEMSPEC);

    let destination = TempDir::new().unwrap();
    write(
        destination.path(),
        "google-cloud-dialogflow.gemspec",
        EXISTING_GEMSPEC,
    );
    write(destination.path(), "CHANGELOG.md", "# Release History\n");

    (generated, destination)
}

fn read(root: &Path, relative: &str) -> String {
    fs::read_to_string(root.join(relative)).unwrap()
}

#[test]
fn stub_reader_is_marked_private_and_nothing_else_changes() {
    let (generated, destination) = setup();
    let config = load_builtin().unwrap();

    synthesize(
        &config,
        &PrebuiltGenerator::new(generated.path()),
        destination.path(),
    )
    .unwrap();

    let expected = AGENTS_CLIENT.replace(
        "          attr_reader :agents_stub\n",
        "          # @private\n          attr_reader :agents_stub\n",
    );
    assert_eq!(
        read(destination.path(), &format!("{CLIENT_DIR}/agents_client.rb")),
        expected
    );
}

#[test]
fn operations_client_is_marked_private() {
    let (generated, destination) = setup();
    let config = load_builtin().unwrap();

    synthesize(
        &config,
        &PrebuiltGenerator::new(generated.path()),
        destination.path(),
    )
    .unwrap();

    assert_eq!(
        read(destination.path(), &format!("{CLIENT_DIR}/intents_client.rb")),
        INTENTS_CLIENT
    );
}

#[test]
fn header_and_urls_are_fixed() {
    let (generated, destination) = setup();
    let config = load_builtin().unwrap();

    let report = synthesize(
        &config,
        &PrebuiltGenerator::new(generated.path()),
        destination.path(),
    )
    .unwrap();

    let entrypoint = read(destination.path(), "lib/google/cloud/dialogflow.rb");
    assert!(entrypoint.contains("\"License\");\n\n\nrequire \"google/gax\""));
    assert!(entrypoint.contains("https://github.com/googleapis/google-cloud-ruby"));
    assert!(!entrypoint.contains("GoogleCloudPlatform"));

    assert_eq!(
        read(destination.path(), "README.md"),
        "See https://googleapis.github.io/google-cloud-ruby/#/docs\n"
    );

    let applied: Vec<&str> = report
        .patches
        .iter()
        .filter(|p| p.applied)
        .map(|p| p.id.as_str())
        .collect();
    assert_eq!(
        applied,
        vec![
            "private-operations-client",
            "private-stub-reader",
            "blank-line-after-header",
            "github-org-url",
            "docs-site-url",
            "pin-rubocop",
        ]
    );
}

#[test]
fn gemspec_merge_keeps_hand_added_dependency() {
    let (generated, destination) = setup();
    let config = load_builtin().unwrap();

    let report = synthesize(
        &config,
        &PrebuiltGenerator::new(generated.path()),
        destination.path(),
    )
    .unwrap();

    let gemspec = read(destination.path(), "google-cloud-dialogflow.gemspec");
    assert!(gemspec.contains(r#"gem.version       = "0.2.3""#));
    assert!(gemspec.contains(r#"gem.add_dependency "google-gax", "~> 1.3""#));
    assert!(gemspec.contains(r#"gem.add_dependency "grpc-google-iam-v1", "~> 0.6.9""#));
    assert!(gemspec.contains(r#"gem.add_development_dependency "rubocop", "~> 0.64.0""#));
    assert!(!gemspec.contains("0.50.0"));

    let gemspec_copy = report
        .copies
        .iter()
        .find(|c| c.source == "google-cloud-dialogflow.gemspec")
        .unwrap();
    assert_eq!(gemspec_copy.merged.len(), 1);
}

#[test]
fn destination_only_files_survive() {
    let (generated, destination) = setup();
    let config = load_builtin().unwrap();

    synthesize(
        &config,
        &PrebuiltGenerator::new(generated.path()),
        destination.path(),
    )
    .unwrap();

    assert_eq!(read(destination.path(), "CHANGELOG.md"), "# Release History\n");
    assert_eq!(read(destination.path(), ".yardopts"), "--markup markdown\n");
}

#[test]
fn second_run_is_idempotent() {
    let (generated, destination) = setup();
    let config = load_builtin().unwrap();
    let generator = PrebuiltGenerator::new(generated.path());

    synthesize(&config, &generator, destination.path()).unwrap();
    let report = check_idempotence(&config, destination.path()).unwrap();
    assert!(
        report.is_idempotent(),
        "violations: {:?}",
        report.violations().map(|v| &v.id).collect::<Vec<_>>()
    );
}

#[test]
fn missing_source_aborts_before_later_steps() {
    let (generated, destination) = setup();
    fs::remove_file(generated.path().join(".yardopts")).unwrap();
    let config = load_builtin().unwrap();

    let err = synthesize(
        &config,
        &PrebuiltGenerator::new(generated.path()),
        destination.path(),
    )
    .unwrap_err();

    match err {
        SynthError::Copy(CopyError::MissingSource { source_path, .. }) => {
            assert_eq!(source_path, ".yardopts")
        }
        other => panic!("unexpected error: {other}"),
    }
    // The gemspec rule comes after .yardopts and never ran
    assert_eq!(
        read(destination.path(), "google-cloud-dialogflow.gemspec"),
        EXISTING_GEMSPEC
    );
    // Neither did the patches
    assert!(read(destination.path(), &format!("{CLIENT_DIR}/agents_client.rb"))
        .contains("\n          attr_reader :agents_stub"));
    assert!(!read(destination.path(), &format!("{CLIENT_DIR}/agents_client.rb"))
        .contains("@private"));
}

#[test]
fn missing_generated_tree_is_a_generation_error() {
    let destination = TempDir::new().unwrap();
    let config = load_builtin().unwrap();

    let err = synthesize(
        &config,
        &PrebuiltGenerator::new(destination.path().join("nope")),
        destination.path(),
    )
    .unwrap_err();
    assert!(matches!(err, SynthError::Generation(_)));
}
