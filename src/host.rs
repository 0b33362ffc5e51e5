use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::capture::CapturedRequest;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionSpec {
    pub name: String,
    pub default: String,
    pub help: String,
}

impl OptionSpec {
    pub fn string(name: &str, default: &str, help: &str) -> Self {
        Self {
            name: name.to_owned(),
            default: default.to_owned(),
            help: help.to_owned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HostOptionError {
    #[error("option `{0}` is already registered")]
    Duplicate(String),
    #[error("unknown option `{0}`")]
    Unknown(String),
    #[error("malformed option assignment `{0}`; expected `name=value`")]
    Malformed(String),
}

/// Handle given to addons while they load.
pub trait OptionLoader {
    fn add_option(&mut self, spec: OptionSpec) -> Result<(), HostOptionError>;
}

/// Resolved option values, available once configuration is final.
pub trait OptionSource {
    fn get(&self, name: &str) -> Option<&str>;
}

#[derive(Debug, Default)]
pub struct HostOptions {
    specs: BTreeMap<String, OptionSpec>,
    values: BTreeMap<String, String>,
}

impl HostOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one `name=value` assignment to a registered option.
    pub fn set(&mut self, assignment: &str) -> Result<(), HostOptionError> {
        let Some((name, value)) = assignment.split_once('=') else {
            return Err(HostOptionError::Malformed(assignment.to_owned()));
        };
        let name = name.trim();
        if name.is_empty() {
            return Err(HostOptionError::Malformed(assignment.to_owned()));
        }
        if !self.specs.contains_key(name) {
            return Err(HostOptionError::Unknown(name.to_owned()));
        }

        self.values.insert(name.to_owned(), value.to_owned());
        Ok(())
    }
}

impl OptionLoader for HostOptions {
    fn add_option(&mut self, spec: OptionSpec) -> Result<(), HostOptionError> {
        if self.specs.contains_key(&spec.name) {
            return Err(HostOptionError::Duplicate(spec.name));
        }
        self.specs.insert(spec.name.clone(), spec);
        Ok(())
    }
}

impl OptionSource for HostOptions {
    fn get(&self, name: &str) -> Option<&str> {
        self.values
            .get(name)
            .map(String::as_str)
            .or_else(|| self.specs.get(name).map(|spec| spec.default.as_str()))
    }
}

/// The four callbacks a host invokes, in order: `load`, `running`, `request`
/// once per intercepted request, then `done`.
#[async_trait]
pub trait Addon: Send {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn load(&mut self, loader: &mut (dyn OptionLoader + Send)) -> Result<(), Self::Error>;

    async fn running(&mut self, options: &(dyn OptionSource + Sync)) -> Result<(), Self::Error>;

    async fn request(&mut self, request: &CapturedRequest) -> Result<(), Self::Error>;

    async fn done(&mut self) -> Result<(), Self::Error>;
}

#[derive(Debug, thiserror::Error)]
pub enum HarnessError<E: std::error::Error + 'static> {
    #[error(transparent)]
    Option(#[from] HostOptionError),
    #[error(transparent)]
    Addon(E),
}

/// Drives one addon through its lifecycle.
pub struct Harness<A> {
    addon: A,
}

impl<A: Addon> Harness<A> {
    /// Loads the addon, applies `assignments` and signals that configuration is
    /// final.
    pub async fn start<I>(mut addon: A, assignments: I) -> Result<Self, HarnessError<A::Error>>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let mut options = HostOptions::new();
        addon.load(&mut options).await.map_err(HarnessError::Addon)?;
        for assignment in assignments {
            options.set(assignment.as_ref())?;
        }
        addon.running(&options).await.map_err(HarnessError::Addon)?;

        Ok(Self { addon })
    }

    /// Hands one request to the addon. A failure only affects this event.
    pub async fn dispatch(&mut self, request: &CapturedRequest) -> Result<(), A::Error> {
        self.addon.request(request).await
    }

    pub async fn shutdown(mut self) -> Result<A, A::Error> {
        self.addon.done().await?;
        Ok(self.addon)
    }

    pub fn addon(&self) -> &A {
        &self.addon
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::{
        Addon, Harness, HarnessError, HostOptionError, HostOptions, OptionLoader, OptionSource,
        OptionSpec,
    };
    use crate::capture::CapturedRequest;

    #[test]
    fn registered_options_fall_back_to_default() {
        let mut options = HostOptions::new();
        options
            .add_option(OptionSpec::string("run", "", "run id"))
            .unwrap();

        assert_eq!(options.get("run"), Some(""));
        assert_eq!(options.get("other"), None);

        options.set("run=42").unwrap();
        assert_eq!(options.get("run"), Some("42"));

        options.set("run=a=b").unwrap();
        assert_eq!(options.get("run"), Some("a=b"));
    }

    #[test]
    fn invalid_assignments_are_rejected() {
        let mut options = HostOptions::new();
        options
            .add_option(OptionSpec::string("run", "", "run id"))
            .unwrap();

        assert_eq!(
            options.set("run"),
            Err(HostOptionError::Malformed("run".to_owned()))
        );
        assert_eq!(
            options.set("=5"),
            Err(HostOptionError::Malformed("=5".to_owned()))
        );
        assert_eq!(
            options.set("mode=fast"),
            Err(HostOptionError::Unknown("mode".to_owned()))
        );
        assert_eq!(
            options.add_option(OptionSpec::string("run", "1", "again")),
            Err(HostOptionError::Duplicate("run".to_owned()))
        );
    }

    #[derive(Debug, thiserror::Error)]
    #[error("{0}")]
    struct Refused(String);

    #[derive(Default)]
    struct Script {
        calls: Vec<String>,
        refuse_requests: bool,
    }

    #[async_trait]
    impl Addon for Script {
        type Error = Refused;

        async fn load(&mut self, loader: &mut (dyn OptionLoader + Send)) -> Result<(), Refused> {
            loader
                .add_option(OptionSpec::string("label", "none", "label"))
                .map_err(|err| Refused(err.to_string()))?;
            self.calls.push("load".to_owned());
            Ok(())
        }

        async fn running(&mut self, options: &(dyn OptionSource + Sync)) -> Result<(), Refused> {
            let label = options.get("label").unwrap_or_default();
            self.calls.push(format!("running:{label}"));
            Ok(())
        }

        async fn request(&mut self, request: &CapturedRequest) -> Result<(), Refused> {
            if self.refuse_requests {
                return Err(Refused(request.path.clone()));
            }
            self.calls.push(format!("request:{}", request.path));
            Ok(())
        }

        async fn done(&mut self) -> Result<(), Refused> {
            self.calls.push("done".to_owned());
            Ok(())
        }
    }

    fn request(path: &str) -> CapturedRequest {
        serde_json::from_value(serde_json::json!({
            "timestamp_start": 0.0,
            "host": "example.com",
            "port": 80,
            "method": "GET",
            "scheme": "http",
            "path": path,
            "http_version": "HTTP/1.1"
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn harness_invokes_callbacks_in_lifecycle_order() {
        let mut harness = Harness::start(Script::default(), ["label=x"]).await.unwrap();
        harness.dispatch(&request("/a")).await.unwrap();
        harness.dispatch(&request("/b")).await.unwrap();
        let addon = harness.shutdown().await.unwrap();

        assert_eq!(
            addon.calls,
            ["load", "running:x", "request:/a", "request:/b", "done"]
        );
    }

    #[tokio::test]
    async fn harness_rejects_unknown_assignments_before_running() {
        let err = Harness::start(Script::default(), ["run=1"])
            .await
            .err()
            .expect("unknown option should fail");

        assert!(matches!(
            err,
            HarnessError::Option(HostOptionError::Unknown(ref name)) if name == "run"
        ));
    }

    #[tokio::test]
    async fn failed_event_does_not_stop_the_harness() {
        let addon = Script {
            refuse_requests: true,
            ..Script::default()
        };
        let mut harness = Harness::start(addon, Vec::<String>::new()).await.unwrap();

        let err = harness.dispatch(&request("/boom")).await.unwrap_err();
        assert_eq!(err.to_string(), "/boom");

        let addon = harness.shutdown().await.unwrap();
        assert_eq!(addon.calls, ["load", "running:none", "done"]);
    }
}
