//! Domain load helpers with schema + invariant validation.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow, bail};
use jsonschema::Draft;
use serde_json::Value;

use crate::core::invariants::validate_invariants;
use crate::domain::{Cpux, Domain};

const DOMAIN_SCHEMA: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/schemas/domain.schema.json"
));

/// Load and validate a domain file (schema + invariants).
pub fn load_domain(path: &Path) -> Result<Domain> {
    let raw =
        fs::read_to_string(path).with_context(|| format!("read domain {}", path.display()))?;
    parse_domain(&raw).with_context(|| format!("load domain {}", path.display()))
}

/// Parse and validate domain JSON: schema conformance, then semantic invariants.
pub fn parse_domain(raw: &str) -> Result<Domain> {
    let value: Value = serde_json::from_str(raw).context("parse domain json")?;
    validate_schema(&value)?;
    let domain: Domain = serde_json::from_value(value).context("deserialize domain")?;
    let errors = validate_invariants(&domain);
    if !errors.is_empty() {
        bail!("invariant violations:\n- {}", errors.join("\n- "));
    }
    Ok(domain)
}

/// Look up a CPUX by id.
pub fn select_cpux<'a>(domain: &'a Domain, id: &str) -> Result<&'a Cpux> {
    domain.cpuxs.get(id).ok_or_else(|| {
        let known: Vec<&str> = domain.cpuxs.keys().map(String::as_str).collect();
        anyhow!(
            "domain '{}' has no cpux '{id}' (known: {})",
            domain.name,
            known.join(", ")
        )
    })
}

fn validate_schema(instance: &Value) -> Result<()> {
    let schema: Value = serde_json::from_str(DOMAIN_SCHEMA).context("parse domain schema")?;
    let compiled = jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .context("compile domain schema")?;
    let messages: Vec<String> = compiled
        .iter_errors(instance)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        bail!("schema validation failed:\n- {}", messages.join("\n- "));
    }
    Ok(())
}
