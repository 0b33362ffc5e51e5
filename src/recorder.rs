use std::{fmt, mem};

use async_trait::async_trait;

use crate::{
    capture::{CaptureError, CapturedRequest},
    fields::normalize,
    host::{Addon, HostOptionError, OptionLoader, OptionSource, OptionSpec},
    run::{RUN_OPTION, RunId, RunIdError, resolve_run_id},
    storage::{FieldGroup, RequestId, RequestRow, RequestStore, StoreError},
};

const RUN_OPTION_HELP: &str = "The ID of the run in the database";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Uninitialized,
    Loaded,
    Running,
    Stopped,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Uninitialized => "uninitialized",
            Self::Loaded => "loaded",
            Self::Running => "running",
            Self::Stopped => "stopped",
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RecorderError {
    #[error("ID of the current run not specified: {0}")]
    RunId(#[from] RunIdError),
    #[error("cannot {operation} while the recorder is {phase}")]
    InvalidState {
        operation: &'static str,
        phase: Phase,
    },
    #[error(transparent)]
    Option(#[from] HostOptionError),
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Outcome of recording one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordedRequest {
    pub id: RequestId,
    pub text_content: bool,
    pub headers: u64,
    pub trailers: u64,
    pub cookies: u64,
}

enum State<S> {
    Uninitialized,
    Loaded { store: S },
    Running { store: S, run: RunId },
    Stopped,
}

impl<S> State<S> {
    fn phase(&self) -> Phase {
        match self {
            Self::Uninitialized => Phase::Uninitialized,
            Self::Loaded { .. } => Phase::Loaded,
            Self::Running { .. } => Phase::Running,
            Self::Stopped => Phase::Stopped,
        }
    }
}

/// Writes every request of one run. Each step commits on its own: the request
/// row is durable before its satellite rows, and a failing satellite insert
/// leaves earlier rows in place.
pub struct RequestRecorder<S: RequestStore> {
    config: S::Config,
    state: State<S>,
}

impl<S: RequestStore> RequestRecorder<S> {
    pub fn new(config: S::Config) -> Self {
        Self {
            config,
            state: State::Uninitialized,
        }
    }

    pub fn phase(&self) -> Phase {
        self.state.phase()
    }

    pub fn run_id(&self) -> Option<RunId> {
        match &self.state {
            State::Running { run, .. } => Some(*run),
            _ => None,
        }
    }

    fn invalid_state(&self, operation: &'static str) -> RecorderError {
        RecorderError::InvalidState {
            operation,
            phase: self.phase(),
        }
    }

    /// Registers the `run` option and opens the store connection.
    pub async fn open(&mut self, loader: &mut (dyn OptionLoader + Send)) -> Result<(), RecorderError> {
        if self.phase() != Phase::Uninitialized {
            return Err(self.invalid_state("load"));
        }

        loader.add_option(OptionSpec::string(RUN_OPTION, "", RUN_OPTION_HELP))?;
        let store = S::connect(&self.config).await?;
        self.state = State::Loaded { store };
        Ok(())
    }

    /// Validates the run id; it stays fixed until shutdown.
    pub fn resolve_run(&mut self, options: &dyn OptionSource) -> Result<RunId, RecorderError> {
        if self.phase() != Phase::Loaded {
            return Err(self.invalid_state("resolve the run id"));
        }

        let run = resolve_run_id(options.get(RUN_OPTION))?;
        match mem::replace(&mut self.state, State::Uninitialized) {
            State::Loaded { store } => {
                self.state = State::Running { store, run };
                tracing::info!(run = %run, "recording requests for run");
                Ok(run)
            }
            other => {
                self.state = other;
                Err(self.invalid_state("resolve the run id"))
            }
        }
    }

    pub async fn record_request(
        &mut self,
        request: &CapturedRequest,
    ) -> Result<RecordedRequest, RecorderError> {
        let phase = self.phase();
        let State::Running { store, run } = &mut self.state else {
            return Err(RecorderError::InvalidState {
                operation: "record a request",
                phase,
            });
        };

        let row = RequestRow {
            run: *run,
            start_time: request.start_time()?,
            host: &request.host,
            port: request.port,
            method: &request.method,
            scheme: &request.scheme,
            authority: &request.authority,
            path: &request.path,
            http_version: &request.http_version,
            content_raw: &request.content,
        };
        let id = store.insert_request(&row).await?;

        let text_content = match request.text_content() {
            Some(content) => {
                store.update_request_content(id, content).await?;
                true
            }
            None => {
                tracing::trace!(request_id = %id, "request body is not storable text; keeping raw bytes only");
                false
            }
        };

        let mut written = [0_u64; 3];
        let groups = [
            (FieldGroup::Headers, normalize(Some(&request.headers))),
            (FieldGroup::Trailers, normalize(request.trailers.as_ref())),
            (FieldGroup::Cookies, normalize(Some(&request.cookies))),
        ];
        for (slot, (group, fields)) in written.iter_mut().zip(&groups) {
            if fields.is_empty() {
                continue;
            }
            *slot = store.insert_fields(*group, id, fields).await?;
        }

        let [headers, trailers, cookies] = written;
        tracing::debug!(
            request_id = %id,
            method = %request.method,
            host = %request.host,
            path = %request.path,
            text_content,
            headers,
            trailers,
            cookies,
            "recorded request"
        );

        Ok(RecordedRequest {
            id,
            text_content,
            headers,
            trailers,
            cookies,
        })
    }

    /// Stamps the run's end time and closes the store. Nothing can be written
    /// afterwards, even if this fails.
    pub async fn shutdown(&mut self) -> Result<(), RecorderError> {
        match mem::replace(&mut self.state, State::Stopped) {
            State::Running { mut store, run } => {
                let updated = store.finish_run(run).await?;
                if updated == 0 {
                    tracing::warn!(run = %run, "no run row matched; end time not recorded");
                }
                store.close().await?;
                tracing::info!(run = %run, "run finished");
                Ok(())
            }
            State::Loaded { store } => {
                tracing::warn!("shutting down before a run id was resolved");
                store.close().await?;
                Ok(())
            }
            State::Uninitialized => Ok(()),
            State::Stopped => Err(RecorderError::InvalidState {
                operation: "shut down",
                phase: Phase::Stopped,
            }),
        }
    }
}

#[async_trait]
impl<S: RequestStore> Addon for RequestRecorder<S> {
    type Error = RecorderError;

    async fn load(&mut self, loader: &mut (dyn OptionLoader + Send)) -> Result<(), RecorderError> {
        self.open(loader).await
    }

    async fn running(&mut self, options: &(dyn OptionSource + Sync)) -> Result<(), RecorderError> {
        self.resolve_run(options).map(|_| ())
    }

    async fn request(&mut self, request: &CapturedRequest) -> Result<(), RecorderError> {
        self.record_request(request).await.map(|_| ())
    }

    async fn done(&mut self) -> Result<(), RecorderError> {
        self.shutdown().await
    }
}
