//! Upload of result files to an FTP server over explicit TLS.
//!
//! Each upload opens its own control connection: `AUTH TLS`, protected data
//! channel, login, binary `STOR` to `<target_dir>/<file_name>`, `QUIT`. The
//! target directory must already exist on the server.

use std::fmt;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use suppaftp::native_tls::TlsConnector;
use suppaftp::types::FileType;
use suppaftp::{FtpResult, NativeTlsConnector, NativeTlsFtpStream};
use tracing::{debug, info};

use super::upload::{UploadError, Uploader};
use crate::config::{ConfigError, CrawlerConfig};

pub const DEFAULT_FTP_PORT: u16 = 21;
pub const DEFAULT_FTP_TARGET_DIR: &str = "ftp/raq/results";

/// Where and as whom to upload.
#[derive(Clone, PartialEq, Eq)]
pub struct FtpSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    /// Remote directory, without leading or trailing slashes.
    pub target_dir: String,
}

impl fmt::Debug for FtpSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FtpSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("target_dir", &self.target_dir)
            .finish()
    }
}

impl FtpSettings {
    /// Reads `ftp_address` (`host` or `host:port`), `ftp_user`,
    /// `ftp_password` and `ftp_target_dir`.
    ///
    /// Returns `None` when no `ftp_address` is configured.
    pub fn from_config(config: &CrawlerConfig) -> Result<Option<Self>, ConfigError> {
        let Some(address) = config.get("ftp_address") else {
            return Ok(None);
        };
        let (host, port) = parse_address(address)?;
        let target_dir = config
            .get("ftp_target_dir")
            .unwrap_or(DEFAULT_FTP_TARGET_DIR)
            .trim_matches('/')
            .to_string();
        Ok(Some(Self {
            host,
            port,
            user: config.require("ftp_user")?.to_string(),
            password: config.require("ftp_password")?.to_string(),
            target_dir,
        }))
    }

    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Remote path of an uploaded file.
    pub fn target_path(&self, file_name: &str) -> String {
        if self.target_dir.is_empty() {
            file_name.to_string()
        } else {
            format!("{}/{}", self.target_dir, file_name)
        }
    }
}

fn parse_address(address: &str) -> Result<(String, u16), ConfigError> {
    let invalid = |reason: &str| ConfigError::Invalid {
        key: "ftp_address".to_string(),
        value: address.to_string(),
        reason: reason.to_string(),
    };
    let address = address.trim();
    let (host, port) = match address.rsplit_once(':') {
        Some((host, port)) => (host, port.parse().map_err(|_| invalid("bad port"))?),
        None => (address, DEFAULT_FTP_PORT),
    };
    if host.is_empty() {
        return Err(invalid("empty host"));
    }
    Ok((host.to_string(), port))
}

/// An authenticated control connection.
pub trait FtpSession {
    /// Stores `bytes` at `path`; returns the number of bytes written.
    fn store(&mut self, path: &str, bytes: &[u8]) -> FtpResult<u64>;

    /// Ends the session politely.
    fn finish(self) -> FtpResult<()>;
}

/// Opens sessions. Blocking; called from a blocking thread.
pub trait FtpConnector: Send + Sync + 'static {
    type Session: FtpSession;

    fn open(&self, settings: &FtpSettings) -> FtpResult<Self::Session>;
}

/// Explicit FTPS with the platform TLS stack.
#[derive(Debug, Clone, Copy, Default)]
pub struct FtpsConnector;

impl FtpConnector for FtpsConnector {
    type Session = NativeTlsFtpStream;

    fn open(&self, settings: &FtpSettings) -> FtpResult<NativeTlsFtpStream> {
        let tls = TlsConnector::new()
            .map_err(|e| suppaftp::FtpError::SecureError(e.to_string()))?;
        let mut stream = NativeTlsFtpStream::connect(settings.endpoint())?
            .into_secure(NativeTlsConnector::from(tls), &settings.host)?;
        stream.login(settings.user.as_str(), settings.password.as_str())?;
        stream.transfer_type(FileType::Binary)?;
        Ok(stream)
    }
}

impl FtpSession for NativeTlsFtpStream {
    fn store(&mut self, path: &str, bytes: &[u8]) -> FtpResult<u64> {
        self.put_file(path, &mut Cursor::new(bytes))
    }

    fn finish(mut self) -> FtpResult<()> {
        self.quit()
    }
}

/// Uploads result files to an FTP server.
#[derive(Debug)]
pub struct FtpUploader<C = FtpsConnector> {
    settings: Arc<FtpSettings>,
    connector: Arc<C>,
}

impl FtpUploader {
    pub fn new(settings: FtpSettings) -> Self {
        Self::with_connector(settings, FtpsConnector)
    }
}

impl<C: FtpConnector> FtpUploader<C> {
    pub fn with_connector(settings: FtpSettings, connector: C) -> Self {
        Self {
            settings: Arc::new(settings),
            connector: Arc::new(connector),
        }
    }

    pub fn settings(&self) -> &FtpSettings {
        &self.settings
    }

    pub fn destination(&self, file_name: &str) -> String {
        format!(
            "ftp://{}/{}",
            self.settings.endpoint(),
            self.settings.target_path(file_name)
        )
    }
}

impl<C: FtpConnector> Uploader for FtpUploader<C> {
    async fn upload(&self, local: &Path, file_name: &str) -> Result<String, UploadError> {
        let destination = self.destination(file_name);
        let remote = self.settings.target_path(file_name);
        let local = local.to_path_buf();
        let settings = Arc::clone(&self.settings);
        let connector = Arc::clone(&self.connector);
        let target = destination.clone();

        let written = tokio::task::spawn_blocking(move || {
            let bytes = std::fs::read(&local).map_err(|source| UploadError::Read {
                path: local.clone(),
                source,
            })?;
            let to_upload_error = |source| UploadError::Ftp {
                destination: target.clone(),
                source,
            };
            let mut session = connector.open(&settings).map_err(to_upload_error)?;
            let written = session.store(&remote, &bytes).map_err(to_upload_error)?;
            if let Err(e) = session.finish() {
                debug!(error = %e, "FTP QUIT failed after a complete upload");
            }
            Ok::<_, UploadError>(written)
        })
        .await
        .map_err(|e| UploadError::Join(e.to_string()))??;

        info!(destination = %destination, bytes = written, "Uploaded result");
        Ok(destination)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io;
    use std::sync::Mutex;

    use suppaftp::FtpError;
    use tempfile::tempdir;

    #[derive(Debug, Default)]
    struct ServerState {
        logins: Vec<(String, String)>,
        files: HashMap<String, Vec<u8>>,
        finished: usize,
    }

    /// An in-memory server; `refuse` fails every connection.
    #[derive(Debug, Default, Clone)]
    struct FakeServer {
        state: Arc<Mutex<ServerState>>,
        refuse: bool,
    }

    struct FakeSession {
        state: Arc<Mutex<ServerState>>,
    }

    impl FtpConnector for FakeServer {
        type Session = FakeSession;

        fn open(&self, settings: &FtpSettings) -> FtpResult<FakeSession> {
            if self.refuse {
                return Err(FtpError::ConnectionError(io::Error::new(
                    io::ErrorKind::ConnectionRefused,
                    "connection refused",
                )));
            }
            self.state
                .lock()
                .unwrap()
                .logins
                .push((settings.user.clone(), settings.password.clone()));
            Ok(FakeSession {
                state: Arc::clone(&self.state),
            })
        }
    }

    impl FtpSession for FakeSession {
        fn store(&mut self, path: &str, bytes: &[u8]) -> FtpResult<u64> {
            self.state
                .lock()
                .unwrap()
                .files
                .insert(path.to_string(), bytes.to_vec());
            Ok(bytes.len() as u64)
        }

        fn finish(self) -> FtpResult<()> {
            self.state.lock().unwrap().finished += 1;
            Ok(())
        }
    }

    fn settings() -> FtpSettings {
        FtpSettings {
            host: "ftp.example.org".to_string(),
            port: 21,
            user: "raq".to_string(),
            password: "hunter2".to_string(),
            target_dir: DEFAULT_FTP_TARGET_DIR.to_string(),
        }
    }

    fn config(vars: &[(&str, &str)]) -> CrawlerConfig {
        let vars: Vec<(String, String)> = vars
            .iter()
            .map(|(k, v)| (format!("RAQ_CRAWLER_TEST_{}", k.to_ascii_uppercase()), v.to_string()))
            .collect();
        CrawlerConfig::from_vars("test", vars)
    }

    #[tokio::test]
    async fn upload_stores_the_file_under_the_target_dir() {
        let dir = tempdir().unwrap();
        let local = dir.path().join("7.json");
        std::fs::write(&local, br#"{"id":7}"#).unwrap();
        let server = FakeServer::default();
        let uploader = FtpUploader::with_connector(settings(), server.clone());

        let destination = uploader.upload(&local, "7.json").await.unwrap();

        assert_eq!(destination, "ftp://ftp.example.org:21/ftp/raq/results/7.json");
        let state = server.state.lock().unwrap();
        assert_eq!(
            state.logins,
            vec![("raq".to_string(), "hunter2".to_string())]
        );
        assert_eq!(
            state.files.get("ftp/raq/results/7.json").map(Vec::as_slice),
            Some(&br#"{"id":7}"#[..])
        );
        assert_eq!(state.finished, 1);
        assert!(local.exists());
    }

    #[tokio::test]
    async fn refused_connection_is_an_ftp_error() {
        let dir = tempdir().unwrap();
        let local = dir.path().join("1.json");
        std::fs::write(&local, b"{}").unwrap();
        let server = FakeServer {
            refuse: true,
            ..FakeServer::default()
        };
        let uploader = FtpUploader::with_connector(settings(), server.clone());

        let err = uploader.upload(&local, "1.json").await.unwrap_err();

        match err {
            UploadError::Ftp { destination, .. } => {
                assert_eq!(destination, "ftp://ftp.example.org:21/ftp/raq/results/1.json")
            }
            other => panic!("expected an FTP error, got {:?}", other),
        }
        assert!(server.state.lock().unwrap().files.is_empty());
    }

    #[tokio::test]
    async fn missing_local_file_never_connects() {
        let dir = tempdir().unwrap();
        let server = FakeServer::default();
        let uploader = FtpUploader::with_connector(settings(), server.clone());

        let err = uploader
            .upload(&dir.path().join("missing.json"), "missing.json")
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::Read { .. }));
        assert!(server.state.lock().unwrap().logins.is_empty());
    }

    #[test]
    fn settings_are_absent_without_an_address() {
        assert_eq!(FtpSettings::from_config(&config(&[])), Ok(None));
    }

    #[test]
    fn settings_default_port_and_target_dir() {
        let settings = FtpSettings::from_config(&config(&[
            ("ftp_address", "files.example.org"),
            ("ftp_user", "raq"),
            ("ftp_password", "pw"),
        ]))
        .unwrap()
        .unwrap();

        assert_eq!(settings.endpoint(), "files.example.org:21");
        assert_eq!(settings.target_path("3.json"), "ftp/raq/results/3.json");
    }

    #[test]
    fn settings_honor_explicit_port_and_dir() {
        let settings = FtpSettings::from_config(&config(&[
            ("ftp_address", "files.example.org:2121"),
            ("ftp_user", "raq"),
            ("ftp_password", "pw"),
            ("ftp_target_dir", "/incoming/"),
        ]))
        .unwrap()
        .unwrap();

        assert_eq!(settings.port, 2121);
        assert_eq!(settings.target_path("3.json"), "incoming/3.json");
    }

    #[test]
    fn settings_require_credentials() {
        let err = FtpSettings::from_config(&config(&[
            ("ftp_address", "files.example.org"),
            ("ftp_user", "raq"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Missing { ref key, .. } if key == "ftp_password"));

        let err = FtpSettings::from_config(&config(&[("ftp_address", "h:notaport")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref key, .. } if key == "ftp_address"));
    }

    #[test]
    fn debug_output_hides_the_password() {
        let rendered = format!("{:?}", settings());
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("ftp.example.org"));
    }
}
