//! Per-SVM NFS exporter configuration. The on-disk file is a pure function of
//! the SVM's export set: deterministic rendering, a content-derived version
//! stamp, atomic replacement and a daemon reload after every change.

use crate::runner::{RunnerError, SystemRunner};
use sha2::{Digest, Sha256};
use snafu::Snafu;
use std::{
    fmt::Write as _,
    path::{Path, PathBuf},
    sync::Arc,
};
use stor_port::types::v0::Export;
use tracing::{debug, info};

/// Version of the rendering scheme, stamped into every file.
pub const TEMPLATE_VERSION: &str = "1.0.0";

/// Errors of the exporter layer.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub), context(suffix(false)))]
pub enum ExporterError {
    #[snafu(display("Failed to write {}: {source}", path.display()))]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("No config snapshot {version} for SVM {svm}"))]
    SnapshotMissing { svm: String, version: String },
    #[snafu(display("Failed to reload exporter for SVM {svm}: {source}"))]
    Reload { svm: String, source: RunnerError },
}

/// Global exporter knobs read from runtime configuration.
#[derive(Debug, Clone)]
pub struct ExporterSettings {
    /// Where `exporter.<svm>.conf` files live.
    pub config_dir: PathBuf,
    /// Where rendered config snapshots are kept for rollback.
    pub state_dir: PathBuf,
    /// `true` additionally enables NFSv3 with the fixed ports below.
    pub enable_v3: bool,
    pub mountd_port: u16,
    pub nlm_port: u16,
}

impl Default for ExporterSettings {
    fn default() -> Self {
        Self {
            config_dir: PathBuf::from(utils::DEFAULT_EXPORTER_CONFIG_DIR),
            state_dir: PathBuf::from(utils::DEFAULT_STATE_DIR),
            enable_v3: false,
            mountd_port: 20048,
            nlm_port: 32768,
        }
    }
}

/// A rendered configuration and its content-derived version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedConfig {
    pub content: String,
    pub config_version: String,
}

/// Renders, installs and reloads per-SVM exporter configuration.
#[derive(Clone)]
pub struct Exporter {
    runner: Arc<dyn SystemRunner>,
    settings: ExporterSettings,
}

impl Exporter {
    pub fn new(runner: Arc<dyn SystemRunner>, settings: ExporterSettings) -> Self {
        Self { runner, settings }
    }

    /// Path of the live configuration file of an SVM.
    pub fn config_path(&self, svm: &str) -> PathBuf {
        self.settings.config_dir.join(format!("exporter.{svm}.conf"))
    }

    fn snapshot_path(&self, svm: &str, version: &str) -> PathBuf {
        self.settings
            .state_dir
            .join("config")
            .join(format!("exporter.{svm}.{version}.conf"))
    }

    /// Render the configuration for one SVM. Pure: the output depends only on
    /// the settings and the export set, never on input order.
    pub fn render(&self, exports: &[Export]) -> RenderedConfig {
        let mut exports: Vec<&Export> = exports.iter().collect();
        exports.sort_by_key(|export| export.export_id);

        let protocols = if self.settings.enable_v3 { "3, 4" } else { "4" };

        let mut body = String::new();
        writeln!(body, "NFS_CORE_PARAM {{").unwrap();
        writeln!(body, "    Protocols = {protocols};").unwrap();
        if self.settings.enable_v3 {
            writeln!(body, "    MNT_Port = {};", self.settings.mountd_port).unwrap();
            writeln!(body, "    NLM_Port = {};", self.settings.nlm_port).unwrap();
        }
        writeln!(body, "}}").unwrap();
        writeln!(body).unwrap();
        writeln!(body, "EXPORT_DEFAULTS {{").unwrap();
        writeln!(body, "    Access_Type = RW;").unwrap();
        writeln!(body, "    Squash = Root_Squash;").unwrap();
        writeln!(body, "}}").unwrap();

        for export in exports {
            let access = match export.access {
                stor_port::types::v0::ExportAccess::Rw => "RW",
                stor_port::types::v0::ExportAccess::Ro => "RO",
            };
            let squash = match export.squash {
                stor_port::types::v0::Squash::RootSquash => "Root_Squash",
                stor_port::types::v0::Squash::NoRootSquash => "No_Root_Squash",
            };
            let sec = if export.sec.is_empty() {
                "sys".to_string()
            } else {
                export
                    .sec
                    .iter()
                    .map(|flavor| flavor.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            };
            writeln!(body).unwrap();
            writeln!(body, "EXPORT {{").unwrap();
            writeln!(body, "    Export_Id = {};", export.export_id).unwrap();
            writeln!(body, "    Path = \"{}\";", export.path).unwrap();
            writeln!(body, "    Pseudo = \"{}\";", export.pseudo).unwrap();
            writeln!(body, "    Protocols = {protocols};").unwrap();
            writeln!(body, "    Access_Type = {access};").unwrap();
            writeln!(body, "    Squash = {squash};").unwrap();
            writeln!(body, "    SecType = {sec};").unwrap();
            writeln!(body, "    CLIENT {{").unwrap();
            writeln!(body, "        Clients = {};", export.client_cidr).unwrap();
            writeln!(body, "    }}").unwrap();
            writeln!(body, "    FSAL {{").unwrap();
            writeln!(body, "        Name = VFS;").unwrap();
            writeln!(body, "    }}").unwrap();
            writeln!(body, "}}").unwrap();
        }

        let config_version = hex::encode(&Sha256::digest(body.as_bytes())[..6]);
        let content = format!(
            "# template_version = {TEMPLATE_VERSION}\n# config_version = {config_version}\n\n{body}"
        );
        RenderedConfig {
            content,
            config_version,
        }
    }

    fn write(&self, path: &Path, content: &str) -> Result<(), ExporterError> {
        utils::fsutils::atomic_write(path, content.as_bytes()).map_err(|source| {
            ExporterError::Write {
                path: path.to_path_buf(),
                source,
            }
        })
    }

    /// Render and install the configuration for an SVM, keeping a snapshot of
    /// the rendered version for rollback. Does not reload.
    pub fn install(&self, svm: &str, exports: &[Export]) -> Result<RenderedConfig, ExporterError> {
        let rendered = self.render(exports);
        self.write(
            &self.snapshot_path(svm, &rendered.config_version),
            &rendered.content,
        )?;
        self.write(&self.snapshot_path(svm, "latest"), &rendered.content)?;
        self.write(&self.config_path(svm), &rendered.content)?;
        debug!(
            %svm,
            config_version = %rendered.config_version,
            "exporter config installed"
        );
        Ok(rendered)
    }

    /// Ask the SVM's daemon to re-read its configuration.
    pub async fn reload(&self, svm: &str) -> Result<(), ExporterError> {
        self.runner
            .run_checked("systemctl", &["reload", &format!("arca-exporter@{svm}")])
            .await
            .map_err(|source| ExporterError::Reload {
                svm: svm.to_string(),
                source,
            })?;
        Ok(())
    }

    /// Install and reload in one step; readers of the REST list observe the
    /// new state only after the reload has returned.
    pub async fn apply(
        &self,
        svm: &str,
        exports: &[Export],
    ) -> Result<RenderedConfig, ExporterError> {
        let rendered = self.install(svm, exports)?;
        self.reload(svm).await?;
        info!(%svm, config_version = %rendered.config_version, "exporter config applied");
        Ok(rendered)
    }

    /// Restore a previously installed snapshot and reload.
    pub async fn rollback(&self, svm: &str, config_version: &str) -> Result<(), ExporterError> {
        let snapshot = self.snapshot_path(svm, config_version);
        let content = std::fs::read_to_string(&snapshot).map_err(|_| {
            ExporterError::SnapshotMissing {
                svm: svm.to_string(),
                version: config_version.to_string(),
            }
        })?;
        self.write(&self.config_path(svm), &content)?;
        self.reload(svm).await?;
        info!(%svm, %config_version, "exporter config rolled back");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::FakeRunner;
    use chrono::Utc;
    use stor_port::types::v0::{ExportAccess, SecFlavor, Squash};

    fn export(id: u32, client: &str, access: ExportAccess) -> Export {
        Export {
            export_id: id,
            svm: "tenant_a".to_string(),
            volume: "vol1".to_string(),
            client_cidr: client.to_string(),
            access,
            squash: Squash::RootSquash,
            sec: vec![SecFlavor::Sys],
            path: "/exports/tenant_a/vol1".to_string(),
            pseudo: "/exports/tenant_a/vol1".to_string(),
            created_at: Utc::now(),
        }
    }

    fn exporter(settings: ExporterSettings) -> Exporter {
        Exporter::new(Arc::new(FakeRunner::new()), settings)
    }

    #[test]
    fn render_is_order_independent_and_versioned() {
        let exporter = exporter(ExporterSettings::default());
        let a = export(1, "10.0.0.0/24", ExportAccess::Rw);
        let b = export(2, "10.1.0.0/24", ExportAccess::Ro);

        let forward = exporter.render(&[a.clone(), b.clone()]);
        let reverse = exporter.render(&[b, a]);

        assert_eq!(forward.content, reverse.content);
        assert_eq!(forward.config_version, reverse.config_version);

        // Blocks appear in ascending export id order.
        let first = forward.content.find("Export_Id = 1;").unwrap();
        let second = forward.content.find("Export_Id = 2;").unwrap();
        assert!(first < second);

        // The header carries both version stamps.
        assert!(forward
            .content
            .starts_with(&format!("# template_version = {TEMPLATE_VERSION}")));
        assert!(forward
            .content
            .contains(&format!("# config_version = {}", forward.config_version)));
    }

    #[test]
    fn version_tracks_content() {
        let exporter = exporter(ExporterSettings::default());
        let one = exporter.render(&[export(1, "10.0.0.0/24", ExportAccess::Rw)]);
        let other = exporter.render(&[export(1, "10.0.0.0/24", ExportAccess::Ro)]);
        assert_ne!(one.config_version, other.config_version);
    }

    #[test]
    fn v3_adds_fixed_ports() {
        let v4_only = exporter(ExporterSettings::default()).render(&[]);
        assert!(v4_only.content.contains("Protocols = 4;"));
        assert!(!v4_only.content.contains("MNT_Port"));

        let settings = ExporterSettings {
            enable_v3: true,
            ..ExporterSettings::default()
        };
        let with_v3 = exporter(settings).render(&[]);
        assert!(with_v3.content.contains("Protocols = 3, 4;"));
        assert!(with_v3.content.contains("MNT_Port = 20048;"));
        assert!(with_v3.content.contains("NLM_Port = 32768;"));
    }

    #[test]
    fn install_writes_config_and_snapshots() {
        let dir = tempfile::tempdir().unwrap();
        let settings = ExporterSettings {
            config_dir: dir.path().join("ganesha"),
            state_dir: dir.path().join("state"),
            ..ExporterSettings::default()
        };
        let exporter = exporter(settings);
        let rendered = exporter
            .install("tenant_a", &[export(1, "10.0.0.0/24", ExportAccess::Rw)])
            .unwrap();

        let live = dir.path().join("ganesha/exporter.tenant_a.conf");
        assert_eq!(std::fs::read_to_string(live).unwrap(), rendered.content);
        let snapshot = dir.path().join(format!(
            "state/config/exporter.tenant_a.{}.conf",
            rendered.config_version
        ));
        assert!(snapshot.exists());
        assert!(dir
            .path()
            .join("state/config/exporter.tenant_a.latest.conf")
            .exists());
    }

    #[tokio::test]
    async fn apply_reloads_daemon() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(FakeRunner::new());
        let exporter = Exporter::new(
            runner.clone(),
            ExporterSettings {
                config_dir: dir.path().join("ganesha"),
                state_dir: dir.path().join("state"),
                ..ExporterSettings::default()
            },
        );
        exporter.apply("tenant_a", &[]).await.unwrap();
        assert!(runner.ran("systemctl reload arca-exporter@tenant_a"));
    }
}
