use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::{
    credentials::{password, Storage},
    error::Error,
    try_on::{Gradio, TryOnBackend},
};

/// The configuration used for running the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Where registered users are kept.
    pub storage: Storage,

    /// The bcrypt cost used when hashing passwords.
    /// Each step up doubles the time a hash takes.
    pub password_cost: u32,

    /// Garment images users can pick from.
    pub wardrobe_dir: PathBuf,

    /// Model images users uploaded.
    pub uploads_dir: PathBuf,

    /// The service generating try-on images.
    pub try_on: TryOnBackend,

    /// Seconds a login session may sit unused before it is forgotten.
    pub session_idle_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage: Storage::default(),
            password_cost: password::DEFAULT_COST,
            wardrobe_dir: "wardrobe".into(),
            uploads_dir: "temp_uploads".into(),
            try_on: TryOnBackend::default(),
            session_idle_secs: 8 * 60 * 60,
        }
    }
}

impl Config {
    fn ron() -> ron::Options {
        ron::Options::default()
            .with_default_extension(ron::extensions::Extensions::IMPLICIT_SOME)
            .with_default_extension(ron::extensions::Extensions::UNWRAP_NEWTYPES)
    }

    /// Deserialize a .ron file's contents.
    pub fn deserialize(input: &str) -> Result<Self, Error> {
        Self::ron()
            .from_str::<Config>(input)
            .map_err(|e| Error::BadConfig(format!("Not a valid configuration: {e}")))
    }

    /// An example configuration with some fields filled in.
    pub fn example() -> Self {
        Self {
            storage: Storage::Sqlite("/var/lib/vton/users.db".into()),
            password_cost: 12,
            wardrobe_dir: "/var/lib/vton/wardrobe".into(),
            uploads_dir: "/tmp/vton/uploads".into(),
            try_on: TryOnBackend::Gradio {
                url: "http://127.0.0.1:7860/".into(),
                api_name: "/submit_function".into(),
                mask_layer: Some("http://127.0.0.1:7860/file=/data/masks/layer_0.png".into()),
            },
            session_idle_secs: 30 * 60,
        }
    }

    /// Serialize the configuration in a "pretty" (i.e. non-compact) fashion.
    pub fn serialize_pretty(&self) -> String {
        Self::ron()
            .to_string_pretty(self, ron::ser::PrettyConfig::default())
            .unwrap_or_else(|e| format!("Could not serialize config: {e}"))
    }

    /// Setup a new configuration from a RON file.
    pub fn new_from_path<P: AsRef<Path>>(p: P) -> Result<Self, Error> {
        let p = p.as_ref();
        let s = std::fs::read_to_string(p)
            .map_err(|e| Error::BadConfig(format!("Could not read {p:?}: {e}")))?;

        Self::deserialize(&s)
    }

    /// How long a login session may sit unused.
    pub fn session_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.session_idle_secs)
    }

    fn check_session_idle(&self) -> Result<(), Error> {
        if self.session_idle_secs == 0 {
            Err(Error::BadConfig(
                "The session idle time must be at least one second".into(),
            ))
        } else {
            Ok(())
        }
    }

    fn check_password_cost(&self) -> Result<(), Error> {
        let allowed = password::MIN_COST..=31;

        if allowed.contains(&self.password_cost) {
            Ok(())
        } else {
            Err(Error::BadConfig(format!(
                "The password cost must be within {allowed:?}, got {}",
                self.password_cost
            )))
        }
    }

    fn check_distinct_dirs(&self) -> Result<(), Error> {
        if self.wardrobe_dir == self.uploads_dir {
            Err(Error::BadConfig(format!("The wardrobe and the uploads must live in different directories, both are {:?}. Otherwise every uploaded model photo shows up as a garment.", self.wardrobe_dir)))
        } else {
            Ok(())
        }
    }

    fn check_try_on(&self) -> Result<(), Error> {
        match &self.try_on {
            TryOnBackend::Gradio {
                url,
                api_name,
                mask_layer,
            } => Gradio::new(url, api_name, mask_layer.clone()).map(|_| ()),
            TryOnBackend::Mock => Ok(()),
        }
    }

    pub(crate) fn validate(&self) -> Result<(), Error> {
        self.check_password_cost()?;
        self.check_distinct_dirs()?;
        self.check_try_on()?;
        self.check_session_idle()?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn serialize() {
        let c = Config::example();

        println!("{}", c.serialize_pretty());
    }

    #[test]
    fn example_round_trips() {
        let c = Config::example();

        assert_eq!(Config::deserialize(&c.serialize_pretty()).unwrap(), c);
        c.validate().unwrap();
    }

    #[test]
    fn deserialize() {
        let input = r#"
(
    storage: Sqlite("users.db"),
    password_cost: 10,
    wardrobe_dir: "wardrobe",
    uploads_dir: "temp_uploads",
    try_on: Gradio(
        url: "http://120.0.0.1:8888/",
        api_name: "/submit_function",
        mask_layer: "http://120.0.0.1:8888/file=/tmp/layer_0.png",
    ),
)
"#;
        let config = Config::deserialize(input).unwrap();

        assert_eq!(config.password_cost, 10);
        assert!(matches!(
            config.try_on,
            TryOnBackend::Gradio {
                mask_layer: Some(_),
                ..
            }
        ));
    }

    #[test]
    fn missing_fields_use_defaults() {
        let config = Config::deserialize("(storage: Memory, try_on: Mock)").unwrap();

        assert_eq!(config.storage, Storage::Memory);
        assert_eq!(config.try_on, TryOnBackend::Mock);
        assert_eq!(config.wardrobe_dir, PathBuf::from("wardrobe"));
        assert_eq!(config.password_cost, password::DEFAULT_COST);
        assert_eq!(config.session_idle_timeout(), Duration::from_secs(8 * 60 * 60));
    }

    #[test]
    fn not_ron() {
        let err = Config::deserialize("{ \"storage\": 1 }")
            .unwrap_err()
            .try_into_bad_config()
            .unwrap();

        assert!(err.contains("Not a valid configuration"));
    }

    #[test]
    fn bad_config_cost() {
        let c = Config {
            password_cost: 2,
            ..Default::default()
        };

        let err = c.validate().unwrap_err().try_into_bad_config().unwrap();

        assert!(err.contains("got 2"));
    }

    #[test]
    fn bad_config_same_dirs() {
        let c = Config {
            uploads_dir: "wardrobe".into(),
            ..Default::default()
        };

        let err = c.validate().unwrap_err().try_into_bad_config().unwrap();

        assert!(err.contains("different directories"));
    }

    #[test]
    fn bad_config_session_idle() {
        let c = Config {
            session_idle_secs: 0,
            ..Default::default()
        };

        let err = c.validate().unwrap_err().try_into_bad_config().unwrap();

        assert!(err.contains("session idle time"));
    }

    #[test]
    fn bad_config_url() {
        let c = Config {
            try_on: TryOnBackend::Gradio {
                url: "::not-a-url".into(),
                api_name: "/submit_function".into(),
                mask_layer: None,
            },
            ..Default::default()
        };

        let err = c.validate().unwrap_err().try_into_bad_config().unwrap();

        assert!(err.contains("::not-a-url"));
    }
}
