use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use strum::{Display, EnumString};

use crate::callback::NullCallback;
use crate::engine::Engine;

/// Commands an external driver may trigger over the pipe. Deliberately a
/// strict subset of the engine surface: install and uninstall need the
/// trusted CLI path, not the bus.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
enum BusCommand {
    Update,
    List,
    Reload,
}

type BusHandler = fn(&mut Engine, &[&str], &mut dyn Write) -> Result<()>;

struct Binding {
    command: BusCommand,
    handler: BusHandler,
}

enum LoopAction {
    Continue,
    Exit,
}

/// Single-threaded command loop over a named pipe.
///
/// Protocol: one request per line, `command:outputfile:arg1:arg2:...`.
/// Output goes to `outputfile` when non-empty, otherwise to stdout, for the
/// duration of that one command. After every request the done sentinel is
/// touched; that touch is the only completion signal. `exit` ends the loop.
/// Malformed lines and unknown commands are dropped, never fatal.
pub struct CommandBus {
    bindings: Vec<Binding>,
}

impl Default for CommandBus {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandBus {
    /// Builds the registration table. Every dispatchable command is wired
    /// here, at startup; there is no dynamic lookup.
    #[must_use]
    pub fn new() -> Self {
        Self {
            bindings: vec![
                Binding {
                    command: BusCommand::Update,
                    handler: handle_update,
                },
                Binding {
                    command: BusCommand::List,
                    handler: handle_list,
                },
                Binding {
                    command: BusCommand::Reload,
                    handler: handle_reload,
                },
            ],
        }
    }

    fn lookup(&self, name: &str) -> Option<BusHandler> {
        let command = name.parse::<BusCommand>().ok()?;
        self.bindings
            .iter()
            .find(|binding| binding.command == command)
            .map(|binding| binding.handler)
    }

    /// Runs the loop until an `exit` request arrives. Both pipe files are
    /// created fresh (stale instances removed) and cleaned up on every exit
    /// path, normal or not.
    ///
    /// # Errors
    /// Returns an error when the pipe cannot be created or reopened;
    /// individual command failures only log.
    pub fn run(&self, engine: &mut Engine, input: &Path, done: &Path) -> Result<()> {
        let _guard = FifoGuard::create(input, done)?;
        tracing::info!(input = %input.display(), "command bus listening");

        loop {
            // Blocks until a writer opens the pipe; EOF means the writer
            // closed and we reopen for the next one.
            let file = File::open(input)
                .with_context(|| format!("unable to open pipe {}", input.display()))?;
            for line in BufReader::new(file).lines() {
                let line = match line {
                    Ok(line) => line,
                    Err(err) => {
                        tracing::warn!(%err, "pipe read error");
                        break;
                    }
                };
                match self.serve_line(engine, &line, done) {
                    LoopAction::Continue => {}
                    LoopAction::Exit => return Ok(()),
                }
            }
        }
    }

    fn serve_line(&self, engine: &mut Engine, line: &str, done: &Path) -> LoopAction {
        let line = line.trim();
        if line.is_empty() {
            return LoopAction::Continue;
        }
        if !line.contains(':') {
            tracing::debug!(line, "ignoring malformed request");
            return LoopAction::Continue;
        }

        let fields: Vec<&str> = line.split(':').collect();
        let command = fields[0].trim().to_ascii_lowercase();
        let outputfile = fields.get(1).map_or("", |field| field.trim());
        let args: Vec<&str> = fields[2..]
            .iter()
            .map(|field| field.trim())
            .filter(|field| !field.is_empty())
            .collect();

        if command == "exit" {
            touch(done);
            return LoopAction::Exit;
        }

        match self.lookup(&command) {
            Some(handler) => {
                if let Err(err) = dispatch(engine, handler, &args, outputfile) {
                    tracing::warn!(command, err = %format!("{err:#}"), "bus command failed");
                }
            }
            None => {
                tracing::debug!(command, "ignoring command outside the bus allow-list");
            }
        }
        touch(done);
        LoopAction::Continue
    }
}

/// Runs one handler with its output scoped to `outputfile` when given,
/// falling back to stdout. The redirection lives exactly as long as the
/// call.
fn dispatch(
    engine: &mut Engine,
    handler: BusHandler,
    args: &[&str],
    outputfile: &str,
) -> Result<()> {
    if outputfile.is_empty() {
        let stdout = io::stdout();
        let mut writer = stdout.lock();
        let result = handler(engine, args, &mut writer);
        writer.flush()?;
        result
    } else {
        let mut writer = File::create(outputfile)
            .with_context(|| format!("unable to open output file {outputfile}"))?;
        let result = handler(engine, args, &mut writer);
        writer.flush()?;
        result
    }
}

fn handle_update(engine: &mut Engine, args: &[&str], writer: &mut dyn Write) -> Result<()> {
    let only = args.first().copied();
    match engine.update_sources(only, &NullCallback) {
        Ok(updated) => writeln!(writer, "updated {updated} source(s)")?,
        Err(err) => writeln!(writer, "error: {err:#}")?,
    }
    Ok(())
}

fn handle_list(engine: &mut Engine, args: &[&str], writer: &mut dyn Write) -> Result<()> {
    let filters: Vec<String> = args.iter().map(|arg| (*arg).to_string()).collect();
    for view in engine.list_ports(&filters) {
        writeln!(
            writer,
            "{}:{}:{}",
            view.record.name,
            view.status.as_str(),
            view.record.title
        )?;
    }
    Ok(())
}

fn handle_reload(engine: &mut Engine, _args: &[&str], writer: &mut dyn Write) -> Result<()> {
    match engine.reload() {
        Ok(()) => writeln!(writer, "reloaded")?,
        Err(err) => writeln!(writer, "error: {err:#}")?,
    }
    Ok(())
}

/// Recreating the done file bumps its mtime, which is all a polling driver
/// watches for.
fn touch(done: &Path) {
    if let Err(err) = fs::write(done, b"") {
        tracing::warn!(done = %done.display(), %err, "unable to touch done file");
    }
}

/// Owns both pipe-protocol files for the lifetime of the loop; removes
/// stale copies at creation and cleans up on drop, abnormal exits included.
struct FifoGuard {
    input: PathBuf,
    done: PathBuf,
}

impl FifoGuard {
    fn create(input: &Path, done: &Path) -> Result<Self> {
        remove_stale(input)?;
        remove_stale(done)?;
        make_fifo(input)?;
        Ok(Self {
            input: input.to_path_buf(),
            done: done.to_path_buf(),
        })
    }
}

impl Drop for FifoGuard {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.input);
        let _ = fs::remove_file(&self.done);
    }
}

fn remove_stale(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => {
            Err(err).with_context(|| format!("unable to remove stale {}", path.display()))
        }
    }
}

#[cfg(unix)]
fn make_fifo(path: &Path) -> Result<()> {
    use std::os::unix::ffi::OsStrExt;
    let cpath = std::ffi::CString::new(path.as_os_str().as_bytes())
        .context("pipe path contains an interior NUL byte")?;
    if unsafe { libc::mkfifo(cpath.as_ptr(), 0o644) } != 0 {
        return Err(io::Error::last_os_error())
            .with_context(|| format!("unable to create pipe {}", path.display()));
    }
    Ok(())
}

#[cfg(not(unix))]
fn make_fifo(path: &Path) -> Result<()> {
    anyhow::bail!("the command bus requires unix named pipes ({})", path.display())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use std::fs::OpenOptions;
    use std::thread;
    use std::time::{Duration, Instant};

    fn spawn_bus(temp: &tempfile::TempDir) -> (PathBuf, PathBuf, thread::JoinHandle<Result<()>>) {
        let input = temp.path().join("bus.in");
        let done = temp.path().join("bus.done");
        let mut config = EngineConfig::at_root(temp.path().join("deck"));
        config.offline = true;
        let mut engine = Engine::new(config).unwrap();
        let handle = {
            let input = input.clone();
            let done = done.clone();
            thread::spawn(move || CommandBus::new().run(&mut engine, &input, &done))
        };
        wait_until(|| input.exists(), "pipe never appeared");
        (input, done, handle)
    }

    fn wait_until(mut condition: impl FnMut() -> bool, what: &str) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while !condition() {
            assert!(Instant::now() < deadline, "timed out: {what}");
            thread::sleep(Duration::from_millis(10));
        }
    }

    fn send(input: &Path, request: &str) {
        let mut pipe = OpenOptions::new().write(true).open(input).unwrap();
        pipe.write_all(request.as_bytes()).unwrap();
    }

    fn read_when_ready(path: &Path) -> String {
        // The output file appears before the handler finishes writing it;
        // wait for content, not existence.
        wait_until(
            || {
                fs::read_to_string(path)
                    .map(|text| !text.trim().is_empty())
                    .unwrap_or(false)
            },
            "output file content",
        );
        fs::read_to_string(path).unwrap()
    }

    #[test]
    fn list_writes_output_file_and_touches_done() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let (input, done, handle) = spawn_bus(&temp);
        let out = temp.path().join("list.out");

        send(&input, &format!("list:{}:\n", out.display()));
        wait_until(|| done.exists(), "done file after list");
        wait_until(|| out.exists(), "list output file");

        send(&input, "exit::\n");
        handle.join().expect("bus thread panicked")?;
        assert!(!input.exists(), "pipe cleaned up on exit");
        assert!(!done.exists(), "done file cleaned up on exit");
        Ok(())
    }

    #[test]
    fn disallowed_and_malformed_requests_keep_the_loop_alive() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let (input, done, handle) = spawn_bus(&temp);

        // install is outside the allow-list; garbage has no colon at all.
        send(&input, "install:whatever:demo.zip\n");
        wait_until(|| done.exists(), "done file after ignored command");
        send(&input, "complete garbage\n");

        let out = temp.path().join("after.out");
        send(&input, &format!("reload:{}:\n", out.display()));
        assert_eq!(read_when_ready(&out).trim(), "reloaded");

        send(&input, "EXIT::\n");
        handle.join().expect("bus thread panicked")?;
        Ok(())
    }

    #[test]
    fn update_reports_through_the_output_file() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let (input, _done, handle) = spawn_bus(&temp);
        let out = temp.path().join("update.out");

        // Engine is offline, so the update reports zero refreshed sources.
        send(&input, &format!("update:{}:\n", out.display()));
        assert_eq!(read_when_ready(&out).trim(), "updated 0 source(s)");

        send(&input, "exit::\n");
        handle.join().expect("bus thread panicked")?;
        Ok(())
    }
}
