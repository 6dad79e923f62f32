use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::Context;
use regex_lite::Regex;
use serde_json::Value;

/// Crates the domain must never pull in: it stays free of I/O and async.
const DOMAIN_FORBIDDEN_DEPS: &[&str] = &["tokio", "sqlx", "reqwest", "async-trait", "tracing-subscriber"];

/// The only engine directory allowed to declare traits.
const PORTS_DIR: &str = "crates/engine/src/infrastructure/ports";

static TRAIT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*pub(?:\([a-z]+\))?\s+trait\s+(\w+)").expect("valid regex"));

fn main() -> anyhow::Result<()> {
    let mut args = std::env::args().skip(1);
    match args.next().as_deref() {
        Some("arch-check") => arch_check(),
        Some(cmd) => anyhow::bail!("Unknown xtask command: {cmd}"),
        None => anyhow::bail!("Usage: cargo xtask <command>\n\nCommands:\n  arch-check"),
    }
}

fn arch_check() -> anyhow::Result<()> {
    let output = std::process::Command::new("cargo")
        .args(["metadata", "--format-version", "1", "--no-deps"])
        .output()
        .context("running cargo metadata")?;

    if !output.status.success() {
        anyhow::bail!("cargo metadata failed")
    }

    let metadata: Value =
        serde_json::from_slice(&output.stdout).context("parsing cargo metadata output")?;
    let root = metadata
        .get("workspace_root")
        .and_then(Value::as_str)
        .map(PathBuf::from)
        .context("cargo metadata has no workspace_root")?;

    let mut violations = domain_dependency_violations(&metadata);
    violations.extend(trait_placement_violations(&root)?);

    if violations.is_empty() {
        println!("arch-check: ok");
        return Ok(());
    }
    for violation in &violations {
        eprintln!("arch-check: {violation}");
    }
    anyhow::bail!("{} architecture violation(s)", violations.len())
}

fn domain_dependency_violations(metadata: &Value) -> Vec<String> {
    let packages = metadata
        .get("packages")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    packages
        .iter()
        .filter(|p| p.get("name").and_then(Value::as_str) == Some("storyloom-domain"))
        .flat_map(|p| p.get("dependencies").and_then(Value::as_array).cloned().unwrap_or_default())
        .filter(|dep| dep.get("kind").is_none_or(Value::is_null))
        .filter_map(|dep| dep.get("name").and_then(Value::as_str).map(str::to_string))
        .filter(|name| DOMAIN_FORBIDDEN_DEPS.contains(&name.as_str()))
        .map(|name| format!("storyloom-domain depends on {name}"))
        .collect()
}

/// Traits belong in the ports module; everything else in the engine is concrete.
fn trait_placement_violations(root: &Path) -> anyhow::Result<Vec<String>> {
    let engine_src = root.join("crates/engine/src");
    let ports = root.join(PORTS_DIR);
    let mut violations = Vec::new();

    for file in rust_files(&engine_src)? {
        if file.starts_with(&ports) {
            continue;
        }
        let source = std::fs::read_to_string(&file)
            .with_context(|| format!("reading {}", file.display()))?;
        for caps in TRAIT_RE.captures_iter(&source) {
            let relative = file.strip_prefix(root).unwrap_or(&file);
            violations.push(format!(
                "trait {} declared outside ports in {}",
                &caps[1],
                relative.display()
            ));
        }
    }
    Ok(violations)
}

fn rust_files(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in std::fs::read_dir(&dir).with_context(|| format!("listing {}", dir.display()))? {
            let path = entry?.path();
            if path.is_dir() {
                pending.push(path);
            } else if path.extension().is_some_and(|ext| ext == "rs") {
                files.push(path);
            }
        }
    }
    Ok(files)
}
