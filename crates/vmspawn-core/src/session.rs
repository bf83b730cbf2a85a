use std::collections::BTreeMap;

/// The user session a controller provisions for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserSession {
    /// Platform user name
    pub user: String,

    /// URL prefix the notebook server is mounted under, e.g. `/user/alice/`
    pub base_path: String,

    /// Environment the platform hands to the notebook server
    pub env: BTreeMap<String, String>,
}

impl UserSession {
    pub fn new(user: impl Into<String>) -> Self {
        let user = user.into();
        Self {
            base_path: format!("/user/{}/", user),
            user,
            env: BTreeMap::new(),
        }
    }

    /// Override the URL prefix; leading and trailing slashes are added as needed
    pub fn with_base_path(mut self, base_path: impl AsRef<str>) -> Self {
        let trimmed = base_path.as_ref().trim_matches('/');
        self.base_path = if trimmed.is_empty() {
            "/".to_string()
        } else {
            format!("/{}/", trimmed)
        };
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }
}
