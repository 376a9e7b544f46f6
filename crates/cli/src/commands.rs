//! Command handlers for the `skskills` binary.

use std::{
    io::{BufRead, Write},
    path::{Path, PathBuf},
    sync::{Arc, Weak},
    time::Duration,
};

use {anyhow::Context, tracing::info};

use {
    skskills_config::{SkskillsConfig, data_dir, discover_and_load},
    skskills_registry::{
        InstalledSkillRecord, LifecycleManager, Namespace, Primitive, ProcessQuiescer,
        RegistryStore, SkillManifest, SkillStore,
    },
    skskills_supervisor::Supervisor,
};

/// Shared wiring for every command that touches the skill home.
pub struct CliContext {
    config: SkskillsConfig,
    namespace: Namespace,
    store: SkillStore,
    registry: Arc<RegistryStore>,
    lifecycle: LifecycleManager,
}

impl CliContext {
    pub fn new(home_override: Option<PathBuf>, agent: Option<&str>) -> Self {
        let config = discover_and_load();
        let home = home_override.unwrap_or_else(|| data_dir(&config));
        let namespace = Namespace::from_agent(agent);
        let store = SkillStore::new(home.clone());
        let registry = Arc::new(RegistryStore::new(home.join("registry.json")));
        let lifecycle = LifecycleManager::new(store.clone(), Arc::clone(&registry));
        Self {
            config,
            namespace,
            store,
            registry,
            lifecycle,
        }
    }

    pub async fn install(&self, source: &Path, force: bool) -> anyhow::Result<()> {
        let record = self.lifecycle.install(source, &self.namespace, force).await?;
        println!(
            "Installed {}@{} into {}",
            record.name, record.manifest.version, record.namespace
        );
        Ok(())
    }

    pub fn list(&self, json: bool) -> anyhow::Result<()> {
        let doc = self.registry.load()?;

        let own: Vec<&InstalledSkillRecord> = doc.records_in(&self.namespace).collect();
        if json {
            println!("{}", serde_json::to_string_pretty(&own)?);
            return Ok(());
        }
        if own.is_empty() && self.namespace.is_global() {
            println!("No skills installed.");
            return Ok(());
        }
        for record in &own {
            println!("{}", format_row(record, None));
        }

        if !self.namespace.is_global() {
            let shadowed: Vec<&str> = own.iter().map(|r| r.name.as_str()).collect();
            for record in doc.records_in(&Namespace::Global) {
                if !shadowed.contains(&record.name.as_str()) {
                    println!("{}", format_row(record, Some("inherited from global")));
                }
            }
        }
        Ok(())
    }

    pub fn info(&self, name: &str) -> anyhow::Result<()> {
        let doc = self.registry.load()?;
        let record = doc
            .get(&self.namespace, name)
            .or_else(|| doc.get(&Namespace::Global, name))
            .with_context(|| format!("skill '{name}' is not installed"))?;
        let m = &record.manifest;

        println!("Name:        {}", m.name);
        println!("Version:     {}", m.version);
        if !m.description.is_empty() {
            println!("Description: {}", m.description);
        }
        if !m.author.is_empty() {
            println!("Author:      {}", m.author);
        }
        if let Some(license) = &m.license {
            println!("License:     {license}");
        }
        println!(
            "Primitives:  {}",
            m.primitives
                .iter()
                .map(|p| format!("{p:?}").to_lowercase())
                .collect::<Vec<_>>()
                .join(", ")
        );
        println!("Entry:       {}", m.entry);
        if !m.tags.is_empty() {
            println!("Tags:        {}", m.tags.join(", "));
        }
        if m.requires_auth {
            println!("Auth:        required");
        }
        println!("Namespace:   {}", record.namespace);
        println!("Enabled:     {}", record.enabled);
        println!(
            "Path:        {}",
            self.store.skill_dir(&record.name, &record.namespace).display()
        );
        Ok(())
    }

    pub async fn uninstall(&self, name: &str, yes: bool) -> anyhow::Result<()> {
        if !yes && !confirm(&format!("Uninstall '{name}' from {}?", self.namespace))? {
            println!("Aborted.");
            return Ok(());
        }
        self.lifecycle.uninstall(name, &self.namespace).await?;
        println!("Uninstalled '{name}'.");
        Ok(())
    }

    pub async fn link(&self, source: &Path) -> anyhow::Result<()> {
        let record = self.lifecycle.link(source, &self.namespace).await?;
        println!(
            "Linked {}@{} -> {}",
            record.name,
            record.manifest.version,
            source.display()
        );
        Ok(())
    }

    pub fn search(&self, query: &str) -> anyhow::Result<()> {
        let doc = self.registry.load()?;
        let needle = query.to_lowercase();
        let mut hits = 0usize;

        for record in &doc.records {
            let m = &record.manifest;
            let matched = m.name.to_lowercase().contains(&needle)
                || m.description.to_lowercase().contains(&needle)
                || m.tags.iter().any(|t| t.to_lowercase().contains(&needle));
            if matched {
                println!("{}", format_row(record, Some(&record.namespace.to_string())));
                hits += 1;
            }
        }
        if hits == 0 {
            println!("No skills matching '{query}'.");
        }
        Ok(())
    }

    pub async fn set_enabled(&self, name: &str, enabled: bool) -> anyhow::Result<()> {
        self.lifecycle
            .set_enabled(name, &self.namespace, enabled)
            .await?;
        println!(
            "{} '{name}'.",
            if enabled { "Enabled" } else { "Disabled" }
        );
        Ok(())
    }

    pub async fn update(&self, name: &str, source: &Path) -> anyhow::Result<()> {
        let record = self.lifecycle.update(name, source, &self.namespace).await?;
        println!("Updated {} to {}", record.name, record.manifest.version);
        Ok(())
    }

    /// Supervise the effective skill set until Ctrl-C. Registry commits made
    /// by other invocations are picked up by polling the revision counter.
    pub async fn run(&self) -> anyhow::Result<()> {
        let supervisor = Supervisor::new(
            self.namespace.clone(),
            self.config.supervisor.clone(),
            Arc::clone(&self.registry),
            self.store.clone(),
        );
        self.lifecycle
            .set_quiescer(Arc::downgrade(&supervisor) as Weak<dyn ProcessQuiescer>)
            .await;

        let started = supervisor.start_enabled().await?;
        info!(namespace = %self.namespace, skills = ?started, "run session started");
        if started.is_empty() {
            println!("No enabled skills in {}; waiting for changes.", self.namespace);
        }

        let mut last_revision = self.registry.revision()?;
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                _ = tokio::time::sleep(Duration::from_secs(2)) => {
                    let revision = self.registry.revision()?;
                    if revision != last_revision {
                        last_revision = revision;
                        supervisor.resync().await?;
                    }
                },
            }
        }

        info!("shutting down run session");
        supervisor.shutdown_all().await;
        for status in supervisor.status_all().await {
            println!("{:<20} {}", status.name, status.state);
        }
        Ok(())
    }
}

/// Scaffold a new skill directory with a manifest, one directory per
/// primitive surface, and a stub entry server that answers the handshake.
pub fn init(
    name: &str,
    dir: Option<PathBuf>,
    author: &str,
    description: &str,
) -> anyhow::Result<()> {
    let dir = dir.unwrap_or_else(|| PathBuf::from(name));
    if dir.join(skskills_registry::MANIFEST_FILENAME).exists() {
        anyhow::bail!("'{}' already contains a skill manifest", dir.display());
    }

    let manifest = SkillManifest {
        name: name.to_string(),
        version: semver::Version::new(0, 1, 0),
        description: description.to_string(),
        author: author.to_string(),
        license: None,
        primitives: vec![Primitive::Knowledge, Primitive::Capability],
        entry: "sh serve.sh".to_string(),
        dependencies: Vec::new(),
        requires_auth: false,
        tags: Vec::new(),
    };
    // Round-trip through validation so a bad name fails here, not at install.
    SkillManifest::validate(&manifest.to_yaml()?)?;

    std::fs::create_dir_all(dir.join("knowledge"))?;
    std::fs::create_dir_all(dir.join("capabilities"))?;
    std::fs::create_dir_all(dir.join("flows"))?;

    std::fs::write(
        dir.join(skskills_registry::MANIFEST_FILENAME),
        manifest.to_yaml()?,
    )?;
    std::fs::write(
        dir.join("knowledge").join("SKILL.md"),
        format!("# {name}\n\n{description}\n"),
    )?;

    let stub = format!(
        "#!/bin/sh\n\
         # Minimal skill server: answer the initialize handshake, then wait\n\
         # for shutdown (stdin EOF).\n\
         read line\n\
         printf '%s\\n' '{{\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{{\"protocolVersion\":\"2025-03-26\",\"capabilities\":{{}},\"serverInfo\":{{\"name\":\"{name}\"}}}}}}'\n\
         cat >/dev/null\n"
    );
    let serve = dir.join("serve.sh");
    std::fs::write(&serve, stub)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&serve, std::fs::Permissions::from_mode(0o755))?;
    }

    println!("Created skill '{name}' in {}", dir.display());
    Ok(())
}

fn format_row(record: &InstalledSkillRecord, note: Option<&str>) -> String {
    let flag = if record.enabled { "enabled" } else { "disabled" };
    let note = note.map(|n| format!(" ({n})")).unwrap_or_default();
    format!(
        "{:<20} {:<10} {}{}  {}",
        record.name, record.manifest.version, flag, note, record.manifest.description
    )
}

fn confirm(prompt: &str) -> anyhow::Result<bool> {
    eprint!("{prompt} [y/N] ");
    std::io::stderr().flush()?;
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().eq_ignore_ascii_case("y"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_init_scaffold_is_installable() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("my-skill");
        init("my-skill", Some(dir.clone()), "tester", "A test skill").unwrap();

        let manifest = SkillManifest::load(&dir).unwrap();
        assert_eq!(manifest.name, "my-skill");
        assert_eq!(manifest.version, semver::Version::new(0, 1, 0));
        assert!(dir.join("knowledge/SKILL.md").is_file());
        assert!(dir.join("capabilities").is_dir());
        assert!(dir.join("flows").is_dir());
        assert!(dir.join("serve.sh").is_file());
    }

    #[test]
    fn test_init_rejects_existing_manifest() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("my-skill");
        init("my-skill", Some(dir.clone()), "", "").unwrap();
        assert!(init("my-skill", Some(dir), "", "").is_err());
    }

    #[test]
    fn test_init_rejects_invalid_name() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("bad");
        assert!(init("Bad_Name", Some(dir), "", "").is_err());
    }
}
