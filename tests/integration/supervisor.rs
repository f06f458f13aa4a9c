use std::{
    fs,
    io::Read,
    net::TcpListener,
    path::{Path, PathBuf},
    process::{Child, Command, ExitStatus, Stdio},
    thread,
    time::{Duration, Instant},
};

use nix::{
    sys::signal::{Signal, kill},
    unistd::Pid,
};
use tempfile::{TempDir, tempdir};

/// A scratch deployment: a lifecycle script that journals every command it
/// receives, plus a config pointing the supervisor at it.
struct Deployment {
    dir: TempDir,
    journal: PathBuf,
    config: PathBuf,
}

impl Deployment {
    /// `cases` is spliced into the script's `case "$1"` block ahead of the
    /// default branch, which succeeds.
    fn new(cases: &str, probe_url: &str, locate: &str) -> Self {
        let dir = tempdir().expect("failed to create tempdir");
        let journal = dir.path().join("journal");
        let script = dir.path().join("xrootd-control.sh");
        fs::write(
            &script,
            format!(
                "echo \"$1\" >> {journal}\ncase \"$1\" in\n{cases}\n  *) exit 0 ;;\nesac\n",
                journal = journal.display()
            ),
        )
        .expect("failed to write control script");

        let cache_root = dir.path().join("cache");
        fs::create_dir_all(&cache_root).expect("failed to create cache root");

        let config = dir.path().join("cachevisor.yaml");
        fs::write(
            &config,
            format!(
                r#"service:
  name: "{script}"
  control: sh
probe:
  url: "{probe_url}"
  cache_root: "{cache_root}"
  timeout: 2s
collector:
  hostname: cache01.example.org
  locate: '{locate}'
  keepalive: "true"
  advertise: "cat > /dev/null"
heartbeat:
  interval: 1h
"#,
                script = script.display(),
                cache_root = cache_root.display(),
            ),
        )
        .expect("failed to write config");

        Self {
            dir,
            journal,
            config,
        }
    }

    fn spawn(&self) -> Child {
        self.spawn_with_stderr(Stdio::null())
    }

    fn spawn_with_stderr(&self, stderr: Stdio) -> Child {
        Command::new(assert_cmd::cargo::cargo_bin!("cachevisor"))
            .arg("run")
            .arg("--config")
            .arg(&self.config)
            .current_dir(self.dir.path())
            .env_remove("RUST_LOG")
            .stdout(Stdio::null())
            .stderr(stderr)
            .spawn()
            .expect("failed to spawn cachevisor")
    }

    fn journal(&self) -> Vec<String> {
        read_lines(&self.journal)
    }

    fn wait_for_journal(&self, expected: usize) -> Vec<String> {
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            let lines = self.journal();
            if lines.len() >= expected {
                return lines;
            }
            if Instant::now() >= deadline {
                panic!("Timed out waiting for {expected} journal lines, got {lines:?}");
            }
            thread::sleep(Duration::from_millis(25));
        }
    }
}

fn read_lines(path: &Path) -> Vec<String> {
    fs::read_to_string(path)
        .map(|content| content.lines().map(str::to_string).collect())
        .unwrap_or_default()
}

fn wait_for_exit(child: &mut Child) -> ExitStatus {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        if let Some(status) = child.try_wait().expect("failed to poll child") {
            return status;
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            panic!("cachevisor did not exit in time");
        }
        thread::sleep(Duration::from_millis(25));
    }
}

fn send(child: &Child, signal: Signal) {
    kill(Pid::from_raw(child.id() as i32), signal).expect("failed to signal cachevisor");
}

/// A listening socket standing in for the xrootd endpoint.
fn endpoint() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("failed to bind endpoint");
    let url = format!("root://127.0.0.1:{}", listener.local_addr().unwrap().port());
    (listener, url)
}

fn closed_endpoint() -> String {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").expect("failed to bind endpoint");
        listener.local_addr().unwrap().port()
    };
    format!("root://127.0.0.1:{port}")
}

fn spawn_sleeper() -> Child {
    Command::new("sleep")
        .arg("60")
        .spawn()
        .expect("failed to spawn sleeper")
}

#[test]
fn start_failure_exits_with_failure() {
    let (_endpoint, url) = endpoint();
    let deployment = Deployment::new("  start) exit 1 ;;", &url, "echo master");

    let mut child = deployment.spawn();
    let status = wait_for_exit(&mut child);

    assert_eq!(status.code(), Some(1));
    assert_eq!(deployment.journal(), vec!["start"]);
}

#[test]
fn term_stops_service_and_exits_cleanly() {
    let (_endpoint, url) = endpoint();
    let deployment = Deployment::new("", &url, "echo master");

    let mut child = deployment.spawn();
    deployment.wait_for_journal(1);
    send(&child, Signal::SIGTERM);

    let status = wait_for_exit(&mut child);
    assert_eq!(status.code(), Some(0));
    assert_eq!(deployment.journal(), vec!["start", "stop"]);
}

#[test]
fn hangup_restarts_then_quit_stops() {
    let (_endpoint, url) = endpoint();
    let deployment = Deployment::new("", &url, "echo master");

    let mut child = deployment.spawn();
    deployment.wait_for_journal(1);

    send(&child, Signal::SIGHUP);
    deployment.wait_for_journal(2);
    send(&child, Signal::SIGQUIT);

    let status = wait_for_exit(&mut child);
    assert_eq!(status.code(), Some(0));
    assert_eq!(deployment.journal(), vec!["start", "restart", "stop"]);
}

#[test]
fn failed_stop_kills_service_and_still_exits_cleanly() {
    let (_endpoint, url) = endpoint();
    let mut service = spawn_sleeper();
    let cases = format!(
        "  stop) exit 1 ;;\n  status) echo \"xrootd (pid {}) is running...\" ;;",
        service.id()
    );
    let deployment = Deployment::new(&cases, &url, "echo master");

    let mut child = deployment.spawn();
    deployment.wait_for_journal(1);
    send(&child, Signal::SIGTERM);

    let status = wait_for_exit(&mut child);
    assert_eq!(status.code(), Some(0));
    assert_eq!(deployment.journal(), vec!["start", "stop", "status"]);
    assert!(!service.wait().expect("failed to reap sleeper").success());
}

#[test]
fn collector_failure_kills_service_and_exits_with_failure() {
    let (_endpoint, url) = endpoint();
    let mut service = spawn_sleeper();
    let cases = format!(
        "  status) echo \"xrootd (pid {}) is running...\" ;;",
        service.id()
    );
    let deployment = Deployment::new(&cases, &url, "echo collector down >&2; exit 2");

    let mut child = deployment.spawn_with_stderr(Stdio::piped());
    let status = wait_for_exit(&mut child);

    assert_eq!(status.code(), Some(1));
    assert_eq!(deployment.journal(), vec!["start", "status"]);
    assert!(!service.wait().expect("failed to reap sleeper").success());

    let mut stderr = String::new();
    child
        .stderr
        .take()
        .expect("stderr was piped")
        .read_to_string(&mut stderr)
        .expect("failed to read stderr");
    let error_lines: Vec<&str> = stderr.lines().filter(|line| line.contains("ERROR")).collect();
    assert_eq!(error_lines.len(), 1, "expected one error line, got {error_lines:?}");
    assert!(error_lines[0].contains("collector down"));
}

#[test]
fn unreachable_service_is_killed_not_restarted() {
    let url = closed_endpoint();
    let deployment = Deployment::new(
        "  status) echo 'xrootd is stopped' ;;",
        &url,
        "echo master",
    );

    let mut child = deployment.spawn();
    let status = wait_for_exit(&mut child);

    assert_eq!(status.code(), Some(1));
    let journal = deployment.journal();
    assert_eq!(journal, vec!["start", "status"]);
    assert!(!journal.iter().any(|line| line == "restart"));
}
