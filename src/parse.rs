//! Command-line parser: one raw line in, one [`Job`] out.
//!
//! The grammar is deliberately small: a line is a `|`-separated chain of
//! segments, optionally terminated by `&`. Each segment is a program name
//! and its arguments, followed by an optional redirection section made of
//! `<path`, `< path`, `>path`, `> path`, `>>path`, `>> path` or `> > path`.
//! There is no quoting, expansion or globbing.

use std::fmt;

use nix::unistd::Pid;
use thiserror::Error;

/// Characters that separate tokens inside a segment.
const SEPARATORS: &[char] = &[' ', '\t', '\r', '\n', '\x07'];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("syntax error: empty command")]
    EmptyCommand,
    #[error("syntax error: redirection without a command")]
    MissingProgram,
    #[error("syntax error: missing file name after `{0}`")]
    MissingTarget(&'static str),
    #[error("syntax error: unexpected word `{0}` after redirection")]
    UnexpectedWord(String),
}

/// Built-in commands are recognized by name; everything else is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessKind {
    Exit,
    Cd,
    Fg,
    Bg,
    External,
}

impl ProcessKind {
    pub fn classify(program: &str) -> ProcessKind {
        match program {
            "exit" => ProcessKind::Exit,
            "cd" => ProcessKind::Cd,
            "fg" => ProcessKind::Fg,
            "bg" => ProcessKind::Bg,
            _ => ProcessKind::External,
        }
    }

    pub fn is_builtin(self) -> bool {
        self != ProcessKind::External
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Running,
    Suspended,
    Continued,
    Terminated,
    Done,
}

impl Status {
    /// The word used in status lines.
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Running => "running",
            Status::Suspended => "suspended",
            Status::Continued => "continued",
            Status::Terminated => "terminated",
            Status::Done => "done",
        }
    }

    /// No further notifications will arrive for a process in this state.
    pub fn is_finished(self) -> bool {
        matches!(self, Status::Done | Status::Terminated)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Truncate,
    Append,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobMode {
    Foreground,
    Background,
    /// Scheduling of a stage that feeds the next one through a pipe.
    Pipeline,
}

/// One pipeline stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Process {
    /// Set by the launcher once the stage has been forked.
    pub pid: Option<Pid>,
    pub program: String,
    /// `args[0]` is the program name.
    pub args: Vec<String>,
    pub argc: usize,
    pub input: Option<String>,
    pub output: Option<String>,
    pub output_mode: OutputMode,
    pub status: Status,
    pub kind: ProcessKind,
}

impl Process {
    fn new(args: Vec<String>) -> Process {
        let program = args[0].clone();
        Process {
            pid: None,
            kind: ProcessKind::classify(&program),
            program,
            argc: args.len(),
            args,
            input: None,
            output: None,
            output_mode: OutputMode::Truncate,
            status: Status::Running,
        }
    }

    /// Pid as shown in status lines; `-1` before launch.
    pub fn raw_pid(&self) -> i32 {
        self.pid.map_or(-1, Pid::as_raw)
    }
}

/// One submitted pipeline. Owns its stages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    /// Assigned by the job table on registration.
    pub id: Option<usize>,
    /// Pid of the first launched stage; every later stage joins it.
    pub pgid: Option<Pid>,
    pub mode: JobMode,
    /// The command text with the background marker removed.
    pub command: String,
    pub processes: Vec<Process>,
}

impl Job {
    /// The leading stage decides whether the job is tracked at all.
    pub fn is_builtin(&self) -> bool {
        self.processes
            .first()
            .map_or(false, |p| p.kind.is_builtin())
    }

    /// Scheduling mode of stage `index`: every stage but the last one runs
    /// as a pipeline feeder, the last one carries the job's mode.
    pub fn stage_mode(&self, index: usize) -> JobMode {
        if index + 1 < self.processes.len() {
            JobMode::Pipeline
        } else {
            self.mode
        }
    }

    pub fn process_mut(&mut self, pid: Pid) -> Option<&mut Process> {
        self.processes.iter_mut().find(|p| p.pid == Some(pid))
    }

    pub fn contains_pid(&self, pid: Pid) -> bool {
        self.processes.iter().any(|p| p.pid == Some(pid))
    }

    /// Every stage exited normally.
    pub fn is_complete(&self) -> bool {
        self.processes.iter().all(|p| p.status == Status::Done)
    }

    /// Every stage exited or was killed, at least one by a signal.
    pub fn is_finished(&self) -> bool {
        self.processes.iter().all(|p| p.status.is_finished())
            && self.processes.iter().any(|p| p.status == Status::Terminated)
    }

    pub fn is_suspended(&self) -> bool {
        self.processes.iter().any(|p| p.status == Status::Suspended)
    }

    /// Stages still expected to report a status change.
    pub fn outstanding(&self) -> usize {
        self.processes
            .iter()
            .filter(|p| p.pid.is_some() && !p.status.is_finished())
            .count()
    }

    /// Launched stages that are neither finished nor stopped.
    pub fn running(&self) -> usize {
        self.processes
            .iter()
            .filter(|p| {
                p.pid.is_some() && !p.status.is_finished() && p.status != Status::Suspended
            })
            .count()
    }

    /// Marks every unfinished stage continued, after SIGCONT was sent.
    pub fn mark_continued(&mut self) {
        for p in self.processes.iter_mut() {
            if !p.status.is_finished() {
                p.status = Status::Continued;
            }
        }
    }
}

/// Parses one line. `Ok(None)` means the line was blank.
pub fn parse_line(line: &str) -> Result<Option<Job>, ParseError> {
    let mut line = line.trim_matches(SEPARATORS);
    if line.is_empty() {
        return Ok(None);
    }

    let mut mode = JobMode::Foreground;
    if line.ends_with('&') && !line.ends_with("\\&") {
        mode = JobMode::Background;
        line = line[..line.len() - 1].trim_end_matches(SEPARATORS);
    }

    let processes = line
        .split('|')
        .map(parse_segment)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Some(Job {
        id: None,
        pgid: None,
        mode,
        command: line.to_owned(),
        processes,
    }))
}

fn is_operator(token: &str) -> bool {
    token.starts_with('<') || token.starts_with('>')
}

fn parse_segment(segment: &str) -> Result<Process, ParseError> {
    let mut tokens = segment
        .split(SEPARATORS)
        .filter(|t| !t.is_empty())
        .peekable();

    let mut args = Vec::new();
    while let Some(token) = tokens.next_if(|t| !is_operator(t)) {
        args.push(token.to_owned());
    }
    if args.is_empty() {
        return Err(if tokens.peek().is_some() {
            ParseError::MissingProgram
        } else {
            ParseError::EmptyCommand
        });
    }
    let mut process = Process::new(args);

    while let Some(token) = tokens.next() {
        if let Some(rest) = token.strip_prefix('<') {
            let path = target(rest, "<", &mut tokens)?;
            process.input = Some(path);
        } else if let Some(rest) = token.strip_prefix('>') {
            let (mut rest, mut op, mut mode) = match rest.strip_prefix('>') {
                Some(rest) => (rest, ">>", OutputMode::Append),
                None => (rest, ">", OutputMode::Truncate),
            };
            // `> >path` and `> > path` spell append as two operators
            if rest.is_empty() && mode == OutputMode::Truncate {
                if let Some(next) = tokens.next_if(|t| t.starts_with('>')) {
                    rest = &next[1..];
                    op = ">>";
                    mode = OutputMode::Append;
                }
            }
            let path = target(rest, op, &mut tokens)?;
            process.output = Some(path);
            process.output_mode = mode;
        } else {
            return Err(ParseError::UnexpectedWord(token.to_owned()));
        }
    }

    Ok(process)
}

/// The file name of a redirection: the rest of the operator token, or the
/// following token.
fn target<'a, I>(
    rest: &str,
    op: &'static str,
    tokens: &mut std::iter::Peekable<I>,
) -> Result<String, ParseError>
where
    I: Iterator<Item = &'a str>,
{
    if !rest.is_empty() {
        if is_operator(rest) {
            return Err(ParseError::MissingTarget(op));
        }
        return Ok(rest.to_owned());
    }
    match tokens.next_if(|t| !is_operator(t)) {
        Some(path) => Ok(path.to_owned()),
        None => Err(ParseError::MissingTarget(op)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(line: &str) -> Job {
        parse_line(line).unwrap().unwrap()
    }

    #[test]
    fn simple_command() {
        let job = parse("echo hi");
        assert_eq!(job.mode, JobMode::Foreground);
        assert_eq!(job.id, None);
        assert_eq!(job.pgid, None);
        assert_eq!(job.processes.len(), 1);
        let p = &job.processes[0];
        assert_eq!(p.args, vec!["echo", "hi"]);
        assert_eq!(p.argc, 2);
        assert_eq!(p.program, "echo");
        assert_eq!(p.pid, None);
        assert_eq!(p.raw_pid(), -1);
        assert_eq!(p.input, None);
        assert_eq!(p.output, None);
        assert_eq!(p.kind, ProcessKind::External);
    }

    #[test]
    fn pipeline_with_redirections() {
        let job = parse("cat a.txt | sort > out.txt");
        assert_eq!(job.processes.len(), 2);
        assert_eq!(job.processes[0].args, vec!["cat", "a.txt"]);
        assert_eq!(job.processes[0].input, None);
        assert_eq!(job.processes[1].args, vec!["sort"]);
        assert_eq!(job.processes[1].output.as_deref(), Some("out.txt"));
        assert_eq!(job.processes[1].output_mode, OutputMode::Truncate);

        let job = parse("cat < a.txt | sort > out.txt");
        assert_eq!(job.processes[0].input.as_deref(), Some("a.txt"));
        assert_eq!(job.processes[0].argc, 1);
    }

    #[test]
    fn background_marker_is_stripped() {
        let job = parse("sleep 5 &");
        assert_eq!(job.mode, JobMode::Background);
        assert_eq!(job.command, "sleep 5");
        assert_eq!(job.processes[0].args, vec!["sleep", "5"]);

        let job = parse("  sleep 5&  ");
        assert_eq!(job.mode, JobMode::Background);
        assert_eq!(job.command, "sleep 5");
    }

    #[test]
    fn escaped_ampersand_stays() {
        let job = parse("echo \\&");
        assert_eq!(job.mode, JobMode::Foreground);
        assert_eq!(job.processes[0].args, vec!["echo", "\\&"]);
    }

    #[test]
    fn blank_lines_yield_nothing() {
        assert_eq!(parse_line(""), Ok(None));
        assert_eq!(parse_line("   \t "), Ok(None));
        assert_eq!(parse_line("\n"), Ok(None));
    }

    #[test]
    fn attached_and_detached_targets() {
        let job = parse("sort <in.txt >out.txt");
        let p = &job.processes[0];
        assert_eq!(p.input.as_deref(), Some("in.txt"));
        assert_eq!(p.output.as_deref(), Some("out.txt"));
        assert_eq!(p.argc, 1);
    }

    #[test]
    fn append_spellings() {
        for line in ["ls >> log", "ls >>log", "ls > > log", "ls > >log"] {
            let job = parse(line);
            let p = &job.processes[0];
            assert_eq!(p.output.as_deref(), Some("log"), "{}", line);
            assert_eq!(p.output_mode, OutputMode::Append, "{}", line);
        }
    }

    #[test]
    fn last_redirection_wins() {
        let job = parse("cat < a < b > c >> d");
        let p = &job.processes[0];
        assert_eq!(p.input.as_deref(), Some("b"));
        assert_eq!(p.output.as_deref(), Some("d"));
        assert_eq!(p.output_mode, OutputMode::Append);

        let job = parse("cat >> a > b");
        assert_eq!(job.processes[0].output_mode, OutputMode::Truncate);
    }

    #[test]
    fn missing_targets_are_rejected() {
        assert_eq!(parse_line("cat <"), Err(ParseError::MissingTarget("<")));
        assert_eq!(parse_line("cat >"), Err(ParseError::MissingTarget(">")));
        assert_eq!(parse_line("cat >>"), Err(ParseError::MissingTarget(">>")));
        assert_eq!(parse_line("cat > >"), Err(ParseError::MissingTarget(">>")));
        assert_eq!(
            parse_line("cat < > out"),
            Err(ParseError::MissingTarget("<"))
        );
        assert_eq!(
            parse_line("cat < | wc"),
            Err(ParseError::MissingTarget("<"))
        );
    }

    #[test]
    fn malformed_segments_are_rejected() {
        assert_eq!(parse_line("ls |"), Err(ParseError::EmptyCommand));
        assert_eq!(parse_line("| wc"), Err(ParseError::EmptyCommand));
        assert_eq!(parse_line("ls || wc"), Err(ParseError::EmptyCommand));
        assert_eq!(parse_line("&"), Err(ParseError::EmptyCommand));
        assert_eq!(parse_line("< in.txt"), Err(ParseError::MissingProgram));
        assert_eq!(
            parse_line("sort > out -r"),
            Err(ParseError::UnexpectedWord("-r".to_owned()))
        );
    }

    #[test]
    fn builtins_are_classified() {
        assert_eq!(parse("cd /tmp").processes[0].kind, ProcessKind::Cd);
        assert_eq!(parse("exit").processes[0].kind, ProcessKind::Exit);
        assert_eq!(parse("fg").processes[0].kind, ProcessKind::Fg);
        assert_eq!(parse("bg").processes[0].kind, ProcessKind::Bg);
        assert!(parse("cd").is_builtin());
        assert!(!parse("ls | cd").is_builtin());
        assert_eq!(parse("ls | cd").processes[1].kind, ProcessKind::Cd);
    }

    #[test]
    fn pipe_spacing_is_consumed() {
        let job = parse("ls -l|wc   -l |  head");
        let args: Vec<_> = job.processes.iter().map(|p| p.args.clone()).collect();
        assert_eq!(
            args,
            vec![vec!["ls", "-l"], vec!["wc", "-l"], vec!["head"]]
        );
        assert_eq!(job.stage_mode(0), JobMode::Pipeline);
        assert_eq!(job.stage_mode(1), JobMode::Pipeline);
        assert_eq!(job.stage_mode(2), JobMode::Foreground);
    }

    #[test]
    fn completion_predicates() {
        let mut job = parse("a | b");
        job.processes[0].pid = Some(Pid::from_raw(10));
        job.processes[1].pid = Some(Pid::from_raw(11));
        assert_eq!(job.outstanding(), 2);

        job.processes[0].status = Status::Done;
        job.processes[1].status = Status::Terminated;
        assert!(!job.is_complete());
        assert!(job.is_finished());
        assert_eq!(job.outstanding(), 0);

        job.processes[1].status = Status::Done;
        assert!(job.is_complete());
        assert!(!job.is_finished());

        job.processes[1].status = Status::Suspended;
        assert!(job.is_suspended());
        assert_eq!(job.outstanding(), 1);
        assert_eq!(job.running(), 0);
        job.mark_continued();
        assert_eq!(job.processes[0].status, Status::Done);
        assert_eq!(job.processes[1].status, Status::Continued);
        assert_eq!(job.running(), 1);
    }
}
