//! Fixture value objects and the userdata directory loader.
use crate::error::FixtureError;
use isubench_core::content_hash;
use rand::seq::SliceRandom;
use rand::Rng;
use std::path::{Path, PathBuf};
use tracing::info;

const ADMIN_COUNT: usize = 10;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct User {
    pub account_name: String,
    pub password: String,
}

impl User {
    pub fn new(account_name: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            account_name: account_name.into(),
            password: password.into(),
        }
    }

    /// Accounts seeded into the target use the name twice as password.
    pub fn seeded(account_name: &str) -> Self {
        Self::new(account_name, account_name.repeat(2))
    }

    pub fn login_form(&self) -> Vec<(String, String)> {
        vec![
            ("account_name".to_string(), self.account_name.clone()),
            ("password".to_string(), self.password.clone()),
        ]
    }
}

/// A binary fixture: where it lives, its content hash and declared type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Asset {
    pub path: PathBuf,
    pub hash: String,
    pub mime_type: String,
}

impl Asset {
    pub fn new(
        path: impl Into<PathBuf>,
        hash: impl Into<String>,
        mime_type: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            hash: hash.into(),
            mime_type: mime_type.into(),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct Userdata {
    pub users: Vec<User>,
    pub admins: Vec<User>,
    pub sentences: Vec<String>,
    pub images: Vec<Asset>,
}

impl Userdata {
    /// Loads `names.txt`, `kaomoji.txt` and `img/000*` from `dir`.
    pub fn load(dir: &Path) -> Result<Self, FixtureError> {
        if dir.as_os_str().is_empty() {
            return Err(FixtureError::NotSpecified);
        }
        let meta = std::fs::metadata(dir).map_err(|source| io_error(dir, source))?;
        if !meta.is_dir() {
            return Err(FixtureError::NotADirectory(dir.display().to_string()));
        }

        let users: Vec<User> = read_lines(&dir.join("names.txt"))?
            .iter()
            .map(|name| User::seeded(name))
            .collect();
        if users.is_empty() {
            return Err(FixtureError::Empty("names.txt"));
        }
        let admins = users[..users.len().min(ADMIN_COUNT)].to_vec();

        let sentences = read_lines(&dir.join("kaomoji.txt"))?;
        if sentences.is_empty() {
            return Err(FixtureError::Empty("kaomoji.txt"));
        }

        let images = load_images(&dir.join("img"))?;
        if images.is_empty() {
            return Err(FixtureError::Empty("img"));
        }

        info!(
            "Loaded {} users, {} sentences, {} images",
            users.len(),
            sentences.len(),
            images.len()
        );

        Ok(Self {
            users,
            admins,
            sentences,
            images,
        })
    }

    pub fn random_user(&self) -> &User {
        choose(&self.users)
    }

    pub fn random_admin(&self) -> &User {
        choose(&self.admins)
    }

    pub fn random_image(&self) -> &Asset {
        choose(&self.images)
    }

    /// Two random filler sentences joined together.
    pub fn random_text(&self) -> String {
        let mut rng = rand::thread_rng();
        let first = self.sentences.choose(&mut rng).cloned().unwrap_or_default();
        let second = self.sentences.choose(&mut rng).cloned().unwrap_or_default();
        first + &second
    }
}

/// Random ASCII alphanumeric string, used for throwaway account names.
pub fn random_alphanumeric(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(rand::distributions::Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

fn choose<T>(items: &[T]) -> &T {
    // Loader guarantees non-empty collections.
    &items[rand::thread_rng().gen_range(0..items.len())]
}

fn read_lines(path: &Path) -> Result<Vec<String>, FixtureError> {
    let content = std::fs::read_to_string(path).map_err(|source| io_error(path, source))?;
    Ok(content
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

fn load_images(dir: &Path) -> Result<Vec<Asset>, FixtureError> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
        .map_err(|source| io_error(dir, source))?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with("000"))
        })
        .collect();
    paths.sort();

    paths
        .into_iter()
        .map(|path| {
            let data = std::fs::read(&path).map_err(|source| io_error(&path, source))?;
            let mime_type = mime_for(&path).to_string();
            Ok(Asset::new(path, content_hash(&data), mime_type))
        })
        .collect()
}

/// Declared MIME type by extension. Unknown extensions get an empty type.
pub fn mime_for(path: &Path) -> &'static str {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        _ => "",
    }
}

fn io_error(path: &Path, source: std::io::Error) -> FixtureError {
    FixtureError::Io {
        path: path.display().to_string(),
        source,
    }
}
