use pk_domain::config::Config;

use crate::connections::{CredentialSource, FsCredentials};

/// Print every app that has a credential bundle, one per line, with the
/// directory its certificate is read from.
pub fn list(config: &Config) {
    let credentials = FsCredentials::new(config.gateway.apps_dir.clone());
    let apps = credentials.installed();
    if apps.is_empty() {
        println!(
            "no credential bundles under {}",
            config.gateway.apps_dir.display()
        );
        return;
    }
    for app in apps {
        println!(
            "{:<48} {:<10} {}",
            app.to_string(),
            app.environment(),
            credentials.dir(&app).display()
        );
    }
}
