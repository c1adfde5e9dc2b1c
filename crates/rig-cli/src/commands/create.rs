//! `rig create` - validate, bind, detach, supervise.

use std::path::Path;

use rig_core::config::RigFile;
use rig_core::error::RigError;
use rig_core::rig::Rig;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

pub fn run(path: &Path, foreground: bool) -> i32 {
    match deploy(path, foreground) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{e}");
            e.exit_code()
        }
    }
}

fn deploy(path: &Path, foreground: bool) -> Result<i32, RigError> {
    // Configuration errors surface here, before anything touches disk.
    let file = RigFile::load(path)?;
    let mut rig = Rig::prepare(&file)?;

    // Claim the socket and working directory while still attached, so
    // collisions are reported synchronously.
    rig.bind()?;

    // The rig's name is the deployment's one line of output.
    println!("{}", rig.name());

    if !foreground {
        // Double-fork BEFORE the Tokio runtime exists; forking a
        // process with live worker threads is undefined behavior. The
        // parent and intermediate child both exit inside.
        daemonize()?;
    }

    init_logging(&rig, foreground)?;
    info!(rig = %rig.name(), detached = !foreground, "rig deployed");

    let runtime = tokio::runtime::Runtime::new()
        .map_err(|e| RigError::runtime(format!("cannot create runtime: {e}")))?;
    let outcome = runtime.block_on(rig.run())?;
    Ok(outcome.exit_code())
}

/// Classic double-fork detachment: fork, setsid, fork again, drop into
/// `/`, and point standard I/O at /dev/null.
fn daemonize() -> Result<(), RigError> {
    use nix::unistd::{fork, setsid, ForkResult};

    let map_err = |e: nix::Error| RigError::deploy(format!("fork failed: {e}"));

    // SAFETY: no threads exist yet; the runtime is built only after
    // this function returns in the grandchild.
    match unsafe { fork() }.map_err(map_err)? {
        ForkResult::Parent { .. } => std::process::exit(0),
        ForkResult::Child => {}
    }

    setsid().map_err(|e| RigError::deploy(format!("setsid failed: {e}")))?;

    // SAFETY: still single-threaded, same as above.
    match unsafe { fork() }.map_err(map_err)? {
        ForkResult::Parent { .. } => std::process::exit(0),
        ForkResult::Child => {}
    }

    std::env::set_current_dir("/")
        .map_err(|e| RigError::deploy(format!("chdir failed: {e}")))?;

    redirect_stdio().map_err(|e| RigError::deploy(format!("stdio redirect failed: {e}")))?;
    Ok(())
}

fn redirect_stdio() -> std::io::Result<()> {
    use std::os::fd::AsRawFd;

    let devnull = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open("/dev/null")?;
    for fd in 0..=2 {
        nix::unistd::dup2(devnull.as_raw_fd(), fd).map_err(std::io::Error::from)?;
    }
    Ok(())
}

/// Detached rigs log into `<workdir>/rig.log`, which rides along in the
/// final archive. Foreground rigs additionally log to stderr.
fn init_logging(rig: &Rig, foreground: bool) -> Result<(), RigError> {
    let filter = EnvFilter::try_from_env("RIG_LOG")
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(rig.workdir().join("rig.log"))
        .map_err(|e| RigError::deploy(format!("cannot open rig log: {e}")))?;

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);
    let stderr_layer = foreground.then(|| {
        tracing_subscriber::fmt::layer().with_writer(std::io::stderr)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stderr_layer)
        .init();
    Ok(())
}
