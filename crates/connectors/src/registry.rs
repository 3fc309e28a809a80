use crate::{
    conn::{ConnInfo, ConnKind},
    database::DatabaseDriver,
    error::ConnectorError,
    filesystem::FileSystemDriver,
    local::LocalFs,
    memory::MemoryDriver,
};
use std::sync::Arc;
use tracing::debug;

/// Resolves a database connection to its driver. Network database
/// drivers plug in here; builds without them surface
/// `DriverUnavailable` at connect time, never at plan time.
pub async fn connect_database(info: &ConnInfo) -> Result<Arc<dyn DatabaseDriver>, ConnectorError> {
    if !info.kind.is_db() {
        return Err(ConnectorError::InvalidUrl {
            url: info.url.clone(),
            reason: format!("'{}' is not a database connection", info.kind),
        });
    }
    debug!(kind = %info.kind, "resolving database driver");
    match info.kind {
        ConnKind::Memory => Ok(Arc::new(MemoryDriver::connect(&info.url))),
        other => Err(ConnectorError::DriverUnavailable(other.to_string())),
    }
}

/// Resolves a filesystem connection to its driver by URL scheme.
pub fn filesystem(info: &ConnInfo) -> Result<Arc<dyn FileSystemDriver>, ConnectorError> {
    filesystem_for_scheme(info.scheme()).ok_or_else(|| match info.kind {
        ConnKind::S3 => ConnectorError::DriverUnavailable("s3".to_string()),
        _ => ConnectorError::InvalidUrl {
            url: info.url.clone(),
            reason: format!("'{}' is not a filesystem connection", info.kind),
        },
    })
}

pub fn filesystem_for_scheme(scheme: &str) -> Option<Arc<dyn FileSystemDriver>> {
    match scheme {
        "file" => Some(Arc::new(LocalFs)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_urls_resolve() {
        let info = ConnInfo::from_url("memory://test_registry").unwrap();
        let driver = connect_database(&info).await.unwrap();
        assert_eq!(driver.kind(), ConnKind::Memory);
    }

    #[tokio::test]
    async fn network_databases_are_unavailable_not_invalid() {
        let info = ConnInfo::from_url("postgres://u:p@host/db").unwrap();
        match connect_database(&info).await {
            Err(ConnectorError::DriverUnavailable(kind)) => assert_eq!(kind, "postgres"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn file_urls_resolve_to_local_driver() {
        let info = ConnInfo::from_url("file:///tmp/x.csv").unwrap();
        let fs = filesystem(&info).unwrap();
        assert_eq!(fs.scheme(), "file");
    }
}
