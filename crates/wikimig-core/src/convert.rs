//! HTML to wiki markup conversion through an external program.

use std::io::{self, Write};
use std::process::{Command, ExitStatus, Stdio};
use std::thread;

use crate::config::ConverterConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
    #[error("failed to start converter `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("converter I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("converter `{program}` exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: ExitStatus,
        stderr: String,
    },

    #[error("converter output is not valid UTF-8")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
}

/// Converts one text value from the legacy HTML dialect to wiki markup.
pub trait Converter: Sync {
    fn convert(&self, text: &str) -> Result<String, ConvertError>;
}

/// Runs `pandoc` (or a compatible program) once per value, feeding the text
/// on stdin and reading the converted text from stdout.
#[derive(Debug, Clone)]
pub struct PandocConverter {
    program: String,
    args: Vec<String>,
}

impl PandocConverter {
    #[must_use]
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    #[must_use]
    pub fn from_config(config: &ConverterConfig) -> Self {
        let mut args = vec![
            "--from".to_string(),
            config.from.clone(),
            "--to".to_string(),
            config.to.clone(),
        ];
        args.extend(config.args.iter().cloned());
        Self::new(config.program.clone(), args)
    }

    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }
}

impl Converter for PandocConverter {
    fn convert(&self, text: &str) -> Result<String, ConvertError> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        // Own process group: a terminal Ctrl-C must reach only wikimig, which
        // lets in-flight conversions finish.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt as _;
            command.process_group(0);
        }

        let mut child = command
            .spawn()
            .map_err(|source| ConvertError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| io::Error::other("converter stdin was not captured"))?;

        // Feed stdin from a second thread so a large document cannot deadlock
        // against a full stdout pipe.
        let output = thread::scope(|scope| {
            let feeder = scope.spawn(move || stdin.write_all(text.as_bytes()));
            let output = child.wait_with_output();
            let fed = feeder
                .join()
                .unwrap_or_else(|_| Err(io::Error::other("converter stdin writer panicked")));
            (fed, output)
        });

        let (fed, output) = output;
        let output = output?;

        if !output.status.success() {
            return Err(ConvertError::Failed {
                program: self.program.clone(),
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        // A converter that exits successfully without reading all of stdin
        // closes the pipe early; only treat that as fatal if it also failed.
        if let Err(err) = fed {
            if err.kind() != io::ErrorKind::BrokenPipe {
                return Err(err.into());
            }
        }

        let mut converted = String::from_utf8(output.stdout)?;
        if converted.ends_with('\n') {
            converted.pop();
            if converted.ends_with('\r') {
                converted.pop();
            }
        }
        Ok(converted)
    }
}
