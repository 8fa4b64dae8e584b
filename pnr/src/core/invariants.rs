//! Semantic invariants not expressible via JSON Schema.

use std::collections::HashSet;
use std::sync::LazyLock;

use crate::domain::{Cpux, Domain, Execution, VolumeEntry};

static CONTAINER_NAME_RE: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9_.-]*$").unwrap());
static ENV_KEY_RE: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap());

/// Check semantic invariants of a domain:
/// - CPUX map keys match CPUX ids
/// - Chunk names are unique within a CPUX
/// - Commands are non-blank
/// - Container names are unique within a CPUX and valid daemon names
/// - Container images are non-blank
/// - Env entries are `KEY=VALUE`, ports are numeric
/// - Volumes are `source:target[:ro|rw]`
pub fn validate_invariants(domain: &Domain) -> Vec<String> {
    let mut errors = Vec::new();
    if domain.name.trim().is_empty() {
        errors.push("domain name must be non-empty".to_string());
    }
    for (key, cpux) in &domain.cpuxs {
        if key != &cpux.id {
            errors.push(format!("cpux key '{}' does not match id '{}'", key, cpux.id));
        }
        validate_cpux(cpux, &mut errors);
    }
    errors
}

fn validate_cpux(cpux: &Cpux, errors: &mut Vec<String>) {
    let mut chunk_names = HashSet::new();
    let mut container_names = HashSet::new();

    for chunk in &cpux.design_chunks {
        let path = format!("{}/{}", cpux.id, chunk.name);
        if chunk.name.trim().is_empty() {
            errors.push(format!("{}: chunk name must be non-empty", cpux.id));
        }
        if !chunk_names.insert(chunk.name.as_str()) {
            errors.push(format!("duplicate chunk '{}' in {}", chunk.name, cpux.id));
        }

        match &chunk.execution {
            Execution::Command(command) => {
                if command.trim().is_empty() {
                    errors.push(format!("{path}: command must be non-empty"));
                }
            }
            Execution::Container(spec) => {
                if !CONTAINER_NAME_RE.is_match(&spec.name) {
                    errors.push(format!("{path}: invalid container name '{}'", spec.name));
                }
                if !container_names.insert(spec.name.as_str()) {
                    errors.push(format!(
                        "{path}: container name '{}' already used in {}",
                        spec.name, cpux.id
                    ));
                }
                if spec.image.trim().is_empty() {
                    errors.push(format!("{path}: container image must be non-empty"));
                }
                if let Some(build_path) = &spec.build_path
                    && build_path.trim().is_empty()
                {
                    errors.push(format!("{path}: build_path must be non-empty when set"));
                }
                for entry in &spec.env {
                    let valid = entry
                        .split_once('=')
                        .is_some_and(|(key, _)| ENV_KEY_RE.is_match(key));
                    if !valid {
                        errors.push(format!("{path}: env entry '{entry}' must be KEY=VALUE"));
                    }
                }
                for (container_port, host_port) in &spec.ports {
                    let port = container_port
                        .split_once('/')
                        .map_or(container_port.as_str(), |(port, _)| port);
                    if port.parse::<u16>().is_err() {
                        errors.push(format!("{path}: invalid container port '{container_port}'"));
                    }
                    if host_port.parse::<u16>().is_err() {
                        errors.push(format!("{path}: invalid host port '{host_port}'"));
                    }
                }
                for volume in &spec.volumes {
                    if let Err(err) = VolumeEntry::parse(volume) {
                        errors.push(format!("{path}: {err}"));
                    }
                }
            }
        }
    }
}
