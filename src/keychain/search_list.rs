//! User keychain search list

use super::KeychainManager;
use crate::error::{KeychainError, Result};
use crate::extract::keychain_list;
use crate::tool::{SECURITY, ToolRunner, path_arg};
use std::path::Path;

impl<R: ToolRunner> KeychainManager<'_, R> {
    /// Keychains currently on the user search list, in order.
    pub async fn search_list(&self) -> Result<Vec<String>> {
        let output = self
            .runner()
            .run(SECURITY, &["list-keychain", "-d", "user"])
            .await?;
        Ok(keychain_list(&output.stdout))
    }

    /// Append `path` to the user search list unless it is already there, then
    /// read the list back to confirm `security` really applied the change.
    pub async fn register_in_search_path(&self, path: &Path) -> Result<()> {
        let keychain = path_arg(path)?;
        let mut keychains = self.search_list().await?;

        if keychains.iter().any(|k| k == keychain) {
            crate::debug!("{keychain} already on the keychain search list");
        } else {
            keychains.push(keychain.to_string());
            let mut args = vec!["list-keychain", "-d", "user", "-s"];
            args.extend(keychains.iter().map(String::as_str));
            self.runner().run(SECURITY, &args).await?;
        }

        if !self.search_list().await?.iter().any(|k| k == keychain) {
            return Err(KeychainError::ConsistencyCheck(format!(
                "temp keychain setup failed: {keychain} missing from the keychain search list"
            )));
        }

        Ok(())
    }
}
