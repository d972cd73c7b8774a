//! External AST-backed parser process.
//!
//! The parser binary is spoken to over a one-shot JSON protocol:
//!
//! ```text
//! stdin:  {"action":"parse_top_level","content":"...","parser":"auto"}
//! stdout: {"ok":true,"parser":"libcst","symbols":[{"kind":"def","name":"calc","start":0,"end":42}]}
//!         {"ok":false,"error":"syntax_error","parser":"ast"}
//! ```
//!
//! The invocation carries a hard wall-clock timeout and a bounded output
//! size; breaching either treats the parser as unavailable. Unavailable
//! maps to the regex fallback (or, in strict mode, to `parse_error=true`).
//! A reported `syntax_error` is always `parse_error=true` — the fallback
//! cannot out-vote the AST.

use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::fallback::RegexParser;
use super::{ParserMode, PythonParse, PythonParser, RawSpan};
use crate::model::symbol::PyKind;

/// Wall-clock limit for one parse invocation.
pub const PARSE_TIMEOUT: Duration = Duration::from_secs(3);

/// Maximum bytes accepted from the parser's stdout.
pub const MAX_OUTPUT_BYTES: usize = 4 * 1024 * 1024;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct ParseRequest<'a> {
    action: &'static str,
    content: &'a str,
    parser: &'a str,
}

#[derive(Deserialize)]
struct ParseResponse {
    ok: bool,
    #[serde(default)]
    parser: Option<String>,
    #[serde(default)]
    symbols: Vec<WireSymbol>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct WireSymbol {
    kind: String,
    name: String,
    start: usize,
    end: usize,
}

enum InvokeError {
    /// The process could not be run to completion: spawn failure, timeout,
    /// oversized or malformed output, or a reported `parser_unavailable`.
    Unavailable(String),
    /// The parser ran and the file does not parse.
    Syntax,
}

// ---------------------------------------------------------------------------
// ExternalParser
// ---------------------------------------------------------------------------

/// AST-backed parsing via a configured external binary.
pub struct ExternalParser {
    bin: PathBuf,
    mode: ParserMode,
    strict: bool,
    fallback: RegexParser,
}

impl ExternalParser {
    /// Wrap the given parser binary.
    #[must_use]
    pub fn new(bin: PathBuf, mode: ParserMode, strict: bool) -> Self {
        Self {
            bin,
            mode,
            strict,
            fallback: RegexParser::new(),
        }
    }

    fn invoke(&self, text: &str) -> Result<Vec<RawSpan>, InvokeError> {
        let request = ParseRequest {
            action: "parse_top_level",
            content: text,
            parser: self.mode.as_str(),
        };
        let payload = serde_json::to_vec(&request)
            .map_err(|e| InvokeError::Unavailable(format!("cannot encode request: {e}")))?;

        let mut child = Command::new(&self.bin)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                InvokeError::Unavailable(format!("cannot spawn {}: {e}", self.bin.display()))
            })?;

        let Some(mut stdout) = child.stdout.take() else {
            reap(&mut child);
            return Err(InvokeError::Unavailable("parser stdout missing".to_owned()));
        };

        // Writer and reader run on their own threads so a stalled pipe in
        // either direction lands in the timeout below instead of blocking
        // this call.
        if let Some(mut stdin) = child.stdin.take() {
            thread::spawn(move || {
                // A parser that exits early closes the pipe; the write
                // error is irrelevant, the response (or its absence) is
                // what gets judged.
                let _ = stdin.write_all(&payload);
                let _ = stdin.write_all(b"\n");
            });
        }

        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let mut buf = Vec::new();
            let result = stdout
                .by_ref()
                .take(MAX_OUTPUT_BYTES as u64 + 1)
                .read_to_end(&mut buf)
                .map(|_| buf);
            let _ = tx.send(result);
        });

        let output = match rx.recv_timeout(PARSE_TIMEOUT) {
            Ok(Ok(bytes)) => {
                reap(&mut child);
                if bytes.len() > MAX_OUTPUT_BYTES {
                    return Err(InvokeError::Unavailable(format!(
                        "parser output exceeded {MAX_OUTPUT_BYTES} bytes"
                    )));
                }
                bytes
            }
            Ok(Err(e)) => {
                reap(&mut child);
                return Err(InvokeError::Unavailable(format!("read failed: {e}")));
            }
            Err(_) => {
                reap(&mut child);
                return Err(InvokeError::Unavailable(format!(
                    "parser timed out after {PARSE_TIMEOUT:?}"
                )));
            }
        };

        let response: ParseResponse = serde_json::from_slice(&output)
            .map_err(|e| InvokeError::Unavailable(format!("malformed parser response: {e}")))?;

        if !response.ok {
            return match response.error.as_deref() {
                Some("syntax_error") => Err(InvokeError::Syntax),
                other => Err(InvokeError::Unavailable(format!(
                    "parser reported {}",
                    other.unwrap_or("an unknown error")
                ))),
            };
        }

        debug!(
            parser = response.parser.as_deref().unwrap_or("unknown"),
            symbols = response.symbols.len(),
            "external parse ok"
        );

        let mut spans = Vec::with_capacity(response.symbols.len());
        for sym in response.symbols {
            let kind = match sym.kind.as_str() {
                "def" => PyKind::Def,
                "class" => PyKind::Class,
                other => {
                    return Err(InvokeError::Unavailable(format!(
                        "parser reported unknown symbol kind '{other}'"
                    )));
                }
            };
            spans.push(RawSpan {
                kind,
                name: sym.name,
                start: sym.start,
                end: sym.end,
            });
        }
        Ok(spans)
    }
}

fn reap(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

impl PythonParser for ExternalParser {
    fn parse_top_level(&self, text: &str) -> PythonParse {
        match self.invoke(text) {
            Ok(spans) => PythonParse::from_spans(text, spans),
            Err(InvokeError::Syntax) => PythonParse::failed(),
            Err(InvokeError::Unavailable(reason)) => {
                if self.strict {
                    warn!(reason, "external parser unavailable in strict mode");
                    PythonParse::failed()
                } else {
                    debug!(reason, "external parser unavailable, using regex fallback");
                    self.fallback.parse_top_level(text)
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// UnavailableParser
// ---------------------------------------------------------------------------

/// Strict mode with no parser binary configured: every parse fails.
pub struct UnavailableParser;

impl PythonParser for UnavailableParser {
    fn parse_top_level(&self, _text: &str) -> PythonParse {
        PythonParse::failed()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
