use std::io::Read;
use std::process::{Child, Command, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};

pub fn io_err(message: &str) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::Other, message.to_string())
}

pub fn run_command(
    executable: &str,
    arguments: Vec<String>,
    descriptor: &str,
) -> std::io::Result<Output> {
    let output = Command::new(executable).args(arguments).output()?;

    if !output.status.success() {
        match String::from_utf8(output.stderr) {
            Ok(text) => return Err(io_err(&format!("{descriptor} failed\n\n{text}"))),
            Err(_) => {
                return Err(io_err(&format!(
                    "{descriptor} failed and the output was not UTF-8"
                )))
            }
        }
    }

    return Ok(output);
}

/// Like `run_command`, but kills the child once `timeout` elapses. With no
/// timeout this degenerates to `run_command`.
pub fn run_command_deadline(
    executable: &str,
    arguments: Vec<String>,
    descriptor: &str,
    timeout: Option<Duration>,
) -> std::io::Result<()> {
    let Some(limit) = timeout else {
        run_command(executable, arguments, descriptor)?;
        return Ok(());
    };

    let mut child = Command::new(executable)
        .args(arguments)
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()?;

    // Drain stderr on a separate thread so a chatty child can't wedge
    // itself on a full pipe and get mistaken for a hang.
    let mut stderr = child.stderr.take();
    let drain = thread::spawn(move || {
        let mut text = String::new();
        if let Some(ref mut pipe) = stderr {
            let _ = pipe.read_to_string(&mut text);
        }
        text
    });

    let started = Instant::now();

    loop {
        if let Some(status) = child.try_wait()? {
            let text = drain.join().unwrap_or_default();

            if status.success() {
                return Ok(());
            }

            return Err(io_err(&format!("{descriptor} failed\n\n{text}")));
        }

        if started.elapsed() > limit {
            kill_and_reap(&mut child);
            let _ = drain.join();

            return Err(io_err(&format!(
                "{descriptor} timed out after {} seconds",
                limit.as_secs()
            )));
        }

        thread::sleep(Duration::from_millis(50));
    }
}

fn kill_and_reap(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_command_captures_stderr_on_failure() {
        let err = run_command(
            "sh",
            vec!["-c".to_owned(), "echo broken >&2; exit 1".to_owned()],
            "probe",
        )
        .unwrap_err();

        let message = err.to_string();
        assert!(message.contains("probe failed"));
        assert!(message.contains("broken"));
    }

    #[test]
    fn deadline_passes_a_quick_command_through() {
        run_command_deadline("true", vec![], "noop", Some(Duration::from_secs(5))).unwrap();
    }

    #[test]
    fn deadline_kills_a_hung_command() {
        let err = run_command_deadline(
            "sleep",
            vec!["30".to_owned()],
            "hang",
            Some(Duration::from_millis(200)),
        )
        .unwrap_err();

        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn deadline_reports_failure_with_stderr() {
        let err = run_command_deadline(
            "sh",
            vec!["-c".to_owned(), "echo nope >&2; exit 3".to_owned()],
            "filter",
            Some(Duration::from_secs(5)),
        )
        .unwrap_err();

        let message = err.to_string();
        assert!(message.contains("filter failed"));
        assert!(message.contains("nope"));
    }
}
