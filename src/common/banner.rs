const RED: &str = "\x1b[31m";
const CYAN: &str = "\x1b[36m";
const YELLOW: &str = "\x1b[33m";
const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";
const DIM: &str = "\x1b[2m";

macro_rules! env_or {
    ($key:literal, $default:literal) => {
        option_env!($key).unwrap_or($default)
    };
}

/// Build metadata baked in by `build.rs`.
pub struct BuildInfo {
    pub version: &'static str,
    pub build_time: &'static str,
    pub branch: &'static str,
    pub commit_short: &'static str,
    pub dirty: bool,
    pub profile: &'static str,
}

impl Default for BuildInfo {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION"),
            build_time: env_or!("BUILD_TIME", "unknown"),
            branch: env_or!("GIT_BRANCH", "unknown"),
            commit_short: env_or!("GIT_COMMIT_SHORT", "unknown"),
            dirty: matches!(option_env!("GIT_DIRTY"), Some("true")),
            profile: if cfg!(debug_assertions) {
                "debug"
            } else {
                "release"
            },
        }
    }
}

impl BuildInfo {
    pub fn commit_display(&self) -> String {
        if self.dirty {
            format!("{} (dirty)", self.commit_short)
        } else {
            self.commit_short.to_owned()
        }
    }
}

pub fn print_banner(info: &BuildInfo) {
    println!();
    println!("{RED}  ┬─┐┬ ┬┌─┐┌┬┐┌─┐┌┬┐┌─┐┌┬┐┌─┐{RESET}");
    println!("{RED}  ├┬┘│ │└─┐ │ │ ││││├─┤ │ │ │{RESET}");
    println!("{RED}  ┴└─└─┘└─┘ ┴ └─┘┴ ┴┴ ┴ ┴ └─┘{RESET}");
    println!("{DIM}================================{RESET}");
    println!();

    print_row("Version", info.version, CYAN);
    print_row("Build time", info.build_time, RESET);
    print_row("Branch", info.branch, RESET);
    if info.dirty {
        println!(
            "  {BOLD}{:<14}{RESET}{}{YELLOW} (dirty){RESET}",
            "Commit", info.commit_short
        );
    } else {
        print_row("Commit", info.commit_short, RESET);
    }
    print_row("Profile", info.profile, YELLOW);
    println!();
}

fn print_row(label: &str, value: &str, color: &str) {
    println!("  {BOLD}{label:<14}{RESET}{color}{value}{RESET}");
}
