use anyhow::{Result, bail};
use std::collections::{BTreeMap, BTreeSet};
use std::process::Command;

/// Read-only snapshot of environment variables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environment {
    vars: BTreeMap<String, String>,
}

impl Environment {
    /// Captures the current process environment. Variables whose name or
    /// value is not valid UTF-8 are skipped.
    pub fn capture() -> Self {
        std::env::vars_os()
            .filter_map(|(key, value)| Some((key.into_string().ok()?, value.into_string().ok()?)))
            .collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.vars.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for Environment
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            vars: iter
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        }
    }
}

/// Variable names that, when all present, mean the services are managed
/// elsewhere and must not be provisioned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentRequirement {
    names: BTreeSet<String>,
}

impl EnvironmentRequirement {
    pub fn new<I, S>(names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: BTreeSet<String> = names.into_iter().map(Into::into).collect();

        if names.is_empty() {
            bail!("environment requirement must name at least one variable");
        }

        if let Some(blank) = names.iter().find(|name| name.trim().is_empty() || name.contains('=')) {
            bail!("invalid environment variable name '{blank}'");
        }

        Ok(Self { names })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    pub fn is_satisfied_by(&self, environment: &Environment) -> bool {
        self.names.iter().all(|name| environment.contains(name))
    }

    pub fn missing<'a>(&'a self, environment: &Environment) -> Vec<&'a str> {
        self.names
            .iter()
            .filter(|name| !environment.contains(name))
            .map(String::as_str)
            .collect()
    }
}

/// Coordinates of the session's services, handed to the caller.
///
/// Has the same shape whether the services were provisioned here or were
/// already running elsewhere.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionConfig {
    vars: BTreeMap<String, String>,
    provisioned: bool,
}

impl SessionConfig {
    pub(crate) fn provisioned(vars: BTreeMap<String, String>) -> Self {
        Self {
            vars,
            provisioned: true,
        }
    }

    /// Builds the config for services already running elsewhere.
    ///
    /// `declared` are the exports provisioning would have produced, so the
    /// result carries the same names either way. Values come from
    /// `environment`; a declared name it does not set keeps its declared
    /// value. Required names are always taken from `environment`.
    pub fn external<'a, I>(
        requirement: &EnvironmentRequirement,
        environment: &Environment,
        declared: I,
    ) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut vars: BTreeMap<String, String> = declared
            .into_iter()
            .map(|(name, value)| {
                let value = environment.get(name).unwrap_or(value);
                (name.to_string(), value.to_string())
            })
            .collect();

        for name in requirement.names() {
            if let Some(value) = environment.get(name) {
                vars.insert(name.to_string(), value.to_string());
            }
        }

        Self {
            vars,
            provisioned: false,
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// `true` when the services were started by this session.
    pub fn is_provisioned(&self) -> bool {
        self.provisioned
    }

    pub fn apply_to<'c>(&self, command: &'c mut Command) -> &'c mut Command {
        command.envs(self.iter())
    }
}
