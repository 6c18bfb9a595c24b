use std::{sync::Arc, time::Duration};

use {
    async_trait::async_trait,
    tracing::{debug, info, warn},
};

use {
    apkrelay_config::RelayConfig,
    apkrelay_session::{LookupRequest, RequestSink, SessionHandle},
    apkrelay_transport::{OutboundPayload, TransportConn},
};

use crate::{
    error::{PipelineError, Result},
    preview::fetch_preview,
    result::{AppArtifact, LookupOutcome, parse_lookup},
    store::ArtifactStore,
    worker::{WorkerRun, WorkerSpec, run_worker},
};

/// Runs one lookup request end to end.
///
/// Clean outcomes (not found, oversize) notify the requester from inside
/// [`Pipeline::run`]; hard failures surface as [`PipelineError`] and are
/// turned into a notice by the [`RequestSink`] impl. Once the worker has
/// produced an artifact, every exit path funnels through a single deferred
/// cleanup of the file.
pub struct Pipeline {
    session: Arc<SessionHandle>,
    store: ArtifactStore,
    worker: WorkerSpec,
    max_artifact_mb: f64,
    preview_timeout: Duration,
    cleanup_delay: Duration,
    developer_name: String,
    instagram: String,
    contact: String,
}

impl Pipeline {
    #[must_use]
    pub fn new(session: Arc<SessionHandle>, store: ArtifactStore, config: &RelayConfig) -> Self {
        Self {
            session,
            store,
            worker: WorkerSpec::from_config(&config.worker),
            max_artifact_mb: config.limits.max_artifact_mb,
            preview_timeout: Duration::from_millis(config.limits.preview_timeout_ms),
            cleanup_delay: Duration::from_millis(config.limits.cleanup_delay_ms),
            developer_name: config.attribution.name.clone(),
            instagram: config.attribution.instagram.clone(),
            contact: config.attribution.contact.clone(),
        }
    }

    /// Run one lookup end to end.
    pub async fn run(&self, conn: &dyn TransportConn, request: &LookupRequest) -> Result<()> {
        info!(query = %request.query, "lookup started");

        let outcome = match run_worker(&self.worker, &request.query).await {
            WorkerRun::Success { stdout } => parse_lookup(&stdout)?,
            WorkerRun::Timeout => return Err(PipelineError::WorkerTimeout),
            WorkerRun::Failure { message } => return Err(PipelineError::WorkerFailure(message)),
        };

        let artifact = match outcome {
            LookupOutcome::NotFound(message) => {
                info!(query = %request.query, "lookup found nothing");
                self.send_text(conn, &request.requester_id, &self.with_footer(&message))
                    .await;
                return Ok(());
            },
            LookupOutcome::Found(artifact) => artifact,
        };

        // Whatever happens from here on, the artifact file is reclaimed.
        let delivered = self.deliver(conn, request, &artifact).await;
        self.store
            .schedule_delete(&artifact.filename, self.cleanup_delay);
        delivered
    }

    /// Size policy, caption with optional preview, upload, confirmation.
    async fn deliver(
        &self,
        conn: &dyn TransportConn,
        request: &LookupRequest,
        artifact: &AppArtifact,
    ) -> Result<()> {
        if artifact.size_mb > self.max_artifact_mb {
            warn!(
                size_mb = artifact.size_mb,
                limit_mb = self.max_artifact_mb,
                "artifact exceeds the size ceiling"
            );
            let notice = format!(
                "File too large!\n\n{}\n{}\nLimit: {} MB",
                artifact.name, artifact.size_label, self.max_artifact_mb as u64
            );
            self.send_text(conn, &request.requester_id, &self.with_footer(&notice))
                .await;
            return Ok(());
        }

        self.send_caption(conn, &request.requester_id, artifact)
            .await;

        if !self.store.exists(&artifact.filename).await {
            return Err(PipelineError::ArtifactMissing(artifact.filename.clone()));
        }
        let bytes = self
            .store
            .read(&artifact.filename)
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    PipelineError::ArtifactMissing(artifact.filename.clone())
                },
                _ => PipelineError::ArtifactRead(e),
            })?;
        let transferred_mb = bytes.len() as f64 / (1024.0 * 1024.0);

        if !self.session.is_open() {
            warn!("upload skipped, session not open");
            return Ok(());
        }
        info!(
            filename = %artifact.filename,
            size_mb = transferred_mb,
            "uploading artifact"
        );
        let document = OutboundPayload::Document {
            bytes,
            filename: artifact.filename.clone(),
            content_type: artifact.kind.content_type().into(),
        };
        conn.send(&request.requester_id, document)
            .await
            .map_err(PipelineError::Upload)?;
        info!(filename = %artifact.filename, "artifact uploaded");

        let mut confirmation = format!(
            "Sent successfully!\n\nSize: {transferred_mb:.2} MB\n\nDeveloper: {}",
            self.developer_name
        );
        if !self.instagram.is_empty() {
            confirmation.push_str("\nInstagram: ");
            confirmation.push_str(&self.instagram);
        }
        self.send_text(conn, &request.requester_id, &self.with_footer(&confirmation))
            .await;
        Ok(())
    }

    /// Send the info caption, as an image when a preview can be fetched.
    ///
    /// Preview failure is not an error: the caption degrades to plain text.
    async fn send_caption(&self, conn: &dyn TransportConn, to: &str, artifact: &AppArtifact) {
        let caption = self.caption(artifact);

        if let Some(url) = artifact.icon_url.as_deref() {
            match fetch_preview(url, self.preview_timeout).await {
                Ok(bytes) => {
                    if !self.session.is_open() {
                        warn!("caption skipped, session not open");
                        return;
                    }
                    match conn
                        .send(to, OutboundPayload::Image {
                            bytes,
                            caption: caption.clone(),
                        })
                        .await
                    {
                        Ok(()) => return,
                        Err(e) => {
                            warn!(error = %e, "image send failed, falling back to text");
                        },
                    }
                },
                Err(e) => {
                    debug!(error = %e, "preview fetch failed, falling back to text");
                },
            }
        }

        self.send_text(conn, to, &caption).await;
    }

    fn caption(&self, artifact: &AppArtifact) -> String {
        let mut text = format!(
            "{}\n\nVersion: {}\nSize: {}\nDeveloper: {}\nType: {}",
            artifact.name,
            artifact.version,
            artifact.size_label,
            artifact.developer,
            artifact.kind
        );
        if let Some(tool) = artifact.kind.installer_tool() {
            text.push_str(&format!("\nNeeds {tool} to install"));
        }
        if artifact.has_obb {
            text.push_str("\nIncludes expansion data");
        }
        text.push_str("\n\nUploading...");
        text
    }

    fn with_footer(&self, text: &str) -> String {
        format!("{text}\n\n_by {}_", self.contact)
    }

    /// Best-effort text send: skipped when the session is not open,
    /// failures logged only. Failure notices reuse this, so a failed
    /// notice can never take the process down.
    async fn send_text(&self, conn: &dyn TransportConn, to: &str, text: &str) {
        if !self.session.is_open() {
            warn!("send skipped, session not open");
            return;
        }
        if let Err(e) = conn.send(to, OutboundPayload::Text(text.into())).await {
            warn!(error = %e, "failed to send message");
        }
    }
}

#[async_trait]
impl RequestSink for Pipeline {
    async fn dispatch(&self, conn: Arc<dyn TransportConn>, request: LookupRequest) {
        if let Err(error) = self.run(conn.as_ref(), &request).await {
            warn!(query = %request.query, %error, "lookup pipeline failed");
            let notice = match &error {
                PipelineError::ArtifactMissing(_) | PipelineError::ArtifactRead(_) => {
                    "Could not find the downloaded file. Try again."
                },
                PipelineError::Upload(_) => "Upload failed. Try again.",
                _ => "Request failed. Try again.",
            };
            self.send_text(conn.as_ref(), &request.requester_id, &self.with_footer(notice))
                .await;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use apkrelay_session::SessionState;
    use apkrelay_transport::{Transport, memory::MemoryTransport};

    use super::*;

    struct Fixture {
        pipeline: Pipeline,
        transport: MemoryTransport,
        store_dir: tempfile::TempDir,
        _script_dir: tempfile::TempDir,
    }

    /// Pipeline wired to a worker stub that prints `json` and exits 0.
    fn fixture(json: &str) -> Fixture {
        let script_dir = tempfile::tempdir().unwrap();
        let script = script_dir.path().join("worker.sh");
        std::fs::write(&script, format!("#!/bin/sh\ncat <<'EOF'\n{json}\nEOF\n")).unwrap();

        let store_dir = tempfile::tempdir().unwrap();

        let mut config = RelayConfig::default();
        config.worker.program = "sh".into();
        config.worker.script = script;
        config.worker.timeout_ms = 5_000;
        config.limits.cleanup_delay_ms = 50;
        config.limits.preview_timeout_ms = 500;

        let session = Arc::new(SessionHandle::new());
        session.set(SessionState::Open);

        let pipeline = Pipeline::new(
            session,
            ArtifactStore::new(store_dir.path()),
            &config,
        );
        Fixture {
            pipeline,
            transport: MemoryTransport::new(),
            store_dir,
            _script_dir: script_dir,
        }
    }

    fn request() -> LookupRequest {
        LookupRequest {
            query: "signal".into(),
            requester_id: "peer".into(),
        }
    }

    fn artifact_json(size_mb: f64, icon_url: Option<&str>) -> String {
        let icon = icon_url
            .map(|u| format!(r#""iconUrl": "{u}","#))
            .unwrap_or_default();
        format!(
            r#"{{
                "name": "Signal",
                "version": "7.0.1",
                "size": "{size_mb} MB",
                "sizeMB": {size_mb},
                "developer": "Signal Foundation",
                {icon}
                "filename": "Signal.apk",
                "fileType": "APK"
            }}"#
        )
    }

    fn texts(transport: &MemoryTransport) -> Vec<String> {
        transport
            .sent()
            .into_iter()
            .filter_map(|(_, p)| match p {
                OutboundPayload::Text(text) => Some(text),
                _ => None,
            })
            .collect()
    }

    fn documents(transport: &MemoryTransport) -> usize {
        transport
            .sent()
            .iter()
            .filter(|(_, p)| matches!(p, OutboundPayload::Document { .. }))
            .count()
    }

    #[tokio::test]
    async fn not_found_sends_exactly_one_message_and_no_upload() {
        let fx = fixture(r#"{"error": "nothing matched 'signal'"}"#);
        let (conn, _rx) = fx.transport.connect().await.unwrap();

        fx.pipeline.run(conn.as_ref(), &request()).await.unwrap();

        let sent = fx.transport.sent();
        assert_eq!(sent.len(), 1);
        let texts = texts(&fx.transport);
        assert!(texts[0].contains("nothing matched 'signal'"));
        assert_eq!(documents(&fx.transport), 0);
    }

    #[tokio::test]
    async fn oversize_artifact_is_rejected_and_reclaimed() {
        let fx = fixture(&artifact_json(2049.0, None));
        std::fs::write(fx.store_dir.path().join("Signal.apk"), b"apk").unwrap();
        let (conn, _rx) = fx.transport.connect().await.unwrap();

        fx.pipeline.run(conn.as_ref(), &request()).await.unwrap();

        assert_eq!(documents(&fx.transport), 0);
        let texts = texts(&fx.transport);
        assert_eq!(texts.len(), 1);
        assert!(texts[0].contains("File too large"));
        assert!(texts[0].contains("2048 MB"));

        // The file is reclaimed after the grace period.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!fx.store_dir.path().join("Signal.apk").exists());
    }

    #[tokio::test]
    async fn successful_upload_confirms_and_reclaims() {
        let fx = fixture(&artifact_json(1.0, None));
        std::fs::write(fx.store_dir.path().join("Signal.apk"), vec![0u8; 2048]).unwrap();
        let (conn, _rx) = fx.transport.connect().await.unwrap();

        fx.pipeline.run(conn.as_ref(), &request()).await.unwrap();

        assert_eq!(documents(&fx.transport), 1);
        let sent = fx.transport.sent();
        let doc = sent
            .iter()
            .find_map(|(_, p)| match p {
                OutboundPayload::Document {
                    filename,
                    content_type,
                    bytes,
                } => Some((filename.clone(), content_type.clone(), bytes.len())),
                _ => None,
            })
            .unwrap();
        assert_eq!(doc.0, "Signal.apk");
        assert_eq!(doc.1, "application/vnd.android.package-archive");
        assert_eq!(doc.2, 2048);

        let texts = texts(&fx.transport);
        // Caption first, confirmation after the upload.
        assert!(texts[0].contains("Uploading"));
        assert!(texts[1].contains("Sent successfully"));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!fx.store_dir.path().join("Signal.apk").exists());
    }

    #[tokio::test]
    async fn missing_artifact_is_reported() {
        let fx = fixture(&artifact_json(1.0, None));
        let (conn, _rx) = fx.transport.connect().await.unwrap();

        let result = fx.pipeline.run(conn.as_ref(), &request()).await;
        assert!(matches!(result, Err(PipelineError::ArtifactMissing(_))));
        assert_eq!(documents(&fx.transport), 0);
    }

    #[tokio::test]
    async fn failed_preview_degrades_to_text_caption() {
        // Nothing listens on this port, so the fetch fails fast.
        let fx = fixture(&artifact_json(1.0, Some("http://127.0.0.1:9/icon.png")));
        std::fs::write(fx.store_dir.path().join("Signal.apk"), b"apk").unwrap();
        let (conn, _rx) = fx.transport.connect().await.unwrap();

        fx.pipeline.run(conn.as_ref(), &request()).await.unwrap();

        let sent = fx.transport.sent();
        assert!(
            !sent
                .iter()
                .any(|(_, p)| matches!(p, OutboundPayload::Image { .. }))
        );
        let texts = texts(&fx.transport);
        assert!(texts[0].contains("Signal"));
        assert!(texts[0].contains("Uploading"));
        assert_eq!(documents(&fx.transport), 1);
    }

    #[tokio::test]
    async fn upload_failure_notifies_and_still_reclaims() {
        let fx = fixture(&artifact_json(1.0, None));
        std::fs::write(fx.store_dir.path().join("Signal.apk"), b"apk").unwrap();
        fx.transport.set_fail_documents(true);
        let (conn, _rx) = fx.transport.connect().await.unwrap();

        fx.pipeline.dispatch(Arc::clone(&conn), request()).await;

        let texts = texts(&fx.transport);
        assert!(texts.iter().any(|t| t.contains("Upload failed")));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!fx.store_dir.path().join("Signal.apk").exists());
    }

    #[tokio::test]
    async fn worker_failure_sends_generic_notice() {
        let script_dir = tempfile::tempdir().unwrap();
        let script = script_dir.path().join("worker.sh");
        std::fs::write(&script, "#!/bin/sh\necho scrape failed >&2\nexit 2\n").unwrap();

        let store_dir = tempfile::tempdir().unwrap();
        let mut config = RelayConfig::default();
        config.worker.program = "sh".into();
        config.worker.script = script;

        let session = Arc::new(SessionHandle::new());
        session.set(SessionState::Open);
        let pipeline = Pipeline::new(session, ArtifactStore::new(store_dir.path()), &config);

        let transport = MemoryTransport::new();
        let (conn, _rx) = transport.connect().await.unwrap();

        pipeline.dispatch(Arc::clone(&conn), request()).await;

        let texts: Vec<String> = transport
            .sent()
            .into_iter()
            .filter_map(|(_, p)| match p {
                OutboundPayload::Text(text) => Some(text),
                _ => None,
            })
            .collect();
        assert_eq!(texts.len(), 1);
        assert!(texts[0].contains("Request failed"));
    }

    #[tokio::test]
    async fn sends_are_skipped_once_session_leaves_open() {
        let fx = fixture(r#"{"error": "nope"}"#);
        fx.pipeline.session.set(SessionState::Closing);
        let (conn, _rx) = fx.transport.connect().await.unwrap();

        fx.pipeline.run(conn.as_ref(), &request()).await.unwrap();

        assert!(fx.transport.sent().is_empty());
    }
}
