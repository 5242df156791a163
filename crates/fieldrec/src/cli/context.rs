//! Backend selection and service construction shared by all commands.

use anyhow::{Context, Result};
use fieldrec_db::RecordDb;
use fieldrec_logging::fieldrec_home;
use fieldrec_workflow::{
    BackendConfig, Credential, FsObjectStore, ObjectWorkflowStore, StaticAccessGate,
    WorkflowConfig, WorkflowService,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::runtime::Runtime;
use tracing::debug;

const CONFIG_FILE: &str = "config.toml";
const DB_FILE: &str = "fieldrec.db";

/// Flags shared by every command.
#[derive(Debug, Clone, Default)]
pub struct GlobalArgs {
    pub config: Option<PathBuf>,
    pub token: Option<String>,
    pub database: Option<PathBuf>,
    pub objects: Option<PathBuf>,
}

enum Backend {
    Sqlite(RecordDb),
    Objects(Arc<ObjectWorkflowStore>),
}

/// An opened backend plus the service and caller credential built on it.
pub struct AppContext {
    pub service: WorkflowService,
    pub credential: Credential,
    backend: Backend,
}

pub fn runtime() -> Result<Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")
}

/// `--config`, else `$FIELDREC_HOME/config.toml` when present, else defaults.
pub fn load_config(globals: &GlobalArgs) -> Result<WorkflowConfig> {
    if let Some(path) = &globals.config {
        return WorkflowConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()));
    }
    let home_config = fieldrec_home()?.join(CONFIG_FILE);
    if home_config.exists() {
        return WorkflowConfig::load(&home_config)
            .with_context(|| format!("Failed to load config {}", home_config.display()));
    }
    Ok(WorkflowConfig::default())
}

/// Command-line flags win over the config file; SQLite under the home
/// directory is the fallback.
pub fn resolve_backend(globals: &GlobalArgs, config: &WorkflowConfig) -> Result<BackendConfig> {
    if let Some(path) = &globals.database {
        return Ok(BackendConfig::Sqlite { path: path.clone() });
    }
    if let Some(root) = &globals.objects {
        return Ok(BackendConfig::ObjectStore { root: root.clone() });
    }
    if let Some(backend) = &config.backend {
        return Ok(backend.clone());
    }
    Ok(BackendConfig::Sqlite {
        path: fieldrec_home()?.join(DB_FILE),
    })
}

impl AppContext {
    pub async fn open(globals: &GlobalArgs) -> Result<Self> {
        let config = load_config(globals)?;
        let gate = Arc::new(StaticAccessGate::from_config(&config.access));
        let backend = match resolve_backend(globals, &config)? {
            BackendConfig::Sqlite { path } => Backend::Sqlite(open_db(&path).await?),
            BackendConfig::Memory => Backend::Sqlite(
                RecordDb::open_in_memory()
                    .await
                    .context("Failed to open in-memory database")?,
            ),
            BackendConfig::ObjectStore { root } => {
                let objects = FsObjectStore::new(&root)
                    .with_context(|| format!("Failed to open object store {}", root.display()))?;
                debug!(root = %root.display(), "object store opened");
                Backend::Objects(Arc::new(ObjectWorkflowStore::from_config(
                    Arc::new(objects),
                    &config,
                )))
            }
        };

        let service = match &backend {
            Backend::Sqlite(db) => WorkflowService::new(Arc::new(db.clone()), gate),
            Backend::Objects(store) => WorkflowService::new(store.clone(), gate),
        };

        Ok(Self {
            service,
            credential: Credential::bearer(globals.token.clone().unwrap_or_default()),
            backend,
        })
    }

    /// The object-store adapter, when that is the active backend.
    pub fn object_store(&self) -> Option<&ObjectWorkflowStore> {
        match &self.backend {
            Backend::Objects(store) => Some(store),
            Backend::Sqlite(_) => None,
        }
    }

    pub async fn close(self) {
        if let Backend::Sqlite(db) = self.backend {
            db.close().await;
        }
    }
}

async fn open_db(path: &Path) -> Result<RecordDb> {
    RecordDb::open(path)
        .await
        .with_context(|| format!("Failed to open database {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config_backend() {
        let config = WorkflowConfig::from_toml_str(
            r#"
            [backend]
            kind = "object_store"
            root = "/srv/objects"
            "#,
        )
        .unwrap();

        let from_config = resolve_backend(&GlobalArgs::default(), &config).unwrap();
        assert_eq!(
            from_config,
            BackendConfig::ObjectStore {
                root: PathBuf::from("/srv/objects")
            }
        );

        let globals = GlobalArgs {
            database: Some(PathBuf::from("/tmp/records.db")),
            ..GlobalArgs::default()
        };
        assert_eq!(
            resolve_backend(&globals, &config).unwrap(),
            BackendConfig::Sqlite {
                path: PathBuf::from("/tmp/records.db")
            }
        );
    }
}
