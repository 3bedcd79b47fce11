use anyhow::Result;
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct MuzzikPaths {
    pub muzzik_home: PathBuf,
    pub state_file: PathBuf,
    pub logs_dir: PathBuf,
}

impl MuzzikPaths {
    pub fn lock_file(&self) -> PathBuf {
        match self.state_file.parent() {
            Some(dir) => dir.join(".sync.lock"),
            None => self.muzzik_home.join(".sync.lock"),
        }
    }

    pub fn audit_log(&self) -> PathBuf {
        self.logs_dir.join("audit.log")
    }
}

fn required_home_dir() -> Result<PathBuf> {
    if let Some(home) = dirs::home_dir() {
        return Ok(home);
    }
    Err(anyhow::anyhow!("HOME directory could not be resolved"))
}

fn env_or_default_path(var: &str, fallback: PathBuf) -> PathBuf {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => PathBuf::from(v.trim()),
        _ => fallback,
    }
}

pub fn resolve_paths() -> Result<MuzzikPaths> {
    let muzzik_home = match env::var("MUZZIK_HOME") {
        Ok(v) if !v.trim().is_empty() => PathBuf::from(v.trim()),
        _ => required_home_dir()?.join("muzzik"),
    };

    let state_file = env_or_default_path(
        "MUZZIK_STATE_FILE",
        muzzik_home.join("state").join("state.json"),
    );
    let logs_dir = env_or_default_path("MUZZIK_LOGS_DIR", muzzik_home.join("logs"));

    Ok(MuzzikPaths {
        muzzik_home,
        state_file,
        logs_dir,
    })
}
