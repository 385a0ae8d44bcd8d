use std::collections::HashMap;
use std::io::{self, BufRead, Write};

use tracing::error;

use crate::common::*;
use crate::config::Config;
use crate::ish::Ish;
use crate::sh::Shell;

type Command<'a> = Box<dyn Fn(&mut dyn Shell, &[&str]) -> CliResult + 'a>;

/// The read-eval-print front end. Commands registered here are answered
/// before the line reaches the shell's parser.
pub struct Cli<'a> {
    sh: Box<dyn Shell + 'a>,
    commands: HashMap<String, Command<'a>>,
}

impl<'a> Cli<'a> {
    pub fn new(config: Config) -> Cli<'a> {
        Cli::with_shell(Box::new(Ish::new(config)))
    }

    pub fn with_shell(sh: Box<dyn Shell + 'a>) -> Cli<'a> {
        let mut cli = Cli {
            sh,
            commands: HashMap::new(),
        };
        cli.command("jobs", |sh, _| sh.list_jobs());
        cli
    }

    fn command<F>(&mut self, name: &str, command: F)
    where
        F: Fn(&mut dyn Shell, &[&str]) -> CliResult + 'a,
    {
        self.commands.insert(name.to_owned(), Box::new(command));
    }

    pub fn dispatch(&mut self, line: &str) -> CliResult {
        let parts: Vec<_> = line.split_whitespace().collect();
        match parts.first().and_then(|name| self.commands.get(*name)) {
            Some(f) => f(self.sh.as_mut(), &parts[1..]),
            None => self.sh.run(line),
        }
    }

    fn emit(&self, res: CliResult) {
        match res {
            Ok(o) => print!("{}", o),
            Err(e) => eprintln!("{}", e),
        };
        let _ = io::stdout().flush();
    }

    /// Runs a single line, then collects whatever finished meanwhile.
    pub fn run_once(&mut self, line: &str) {
        let res = self.dispatch(line);
        self.emit(res);
        let res = self.sh.poll();
        self.emit(res);
    }

    pub fn go(&mut self) {
        let stdin = io::stdin();
        let mut buf = String::new();
        loop {
            let res = self.sh.poll();
            self.emit(res);
            let res = self.sh.prompt();
            self.emit(res);

            buf.clear();
            match stdin.lock().read_line(&mut buf) {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!(error = %e, "reading input failed");
                    break;
                }
            }
            let res = self.dispatch(&buf);
            self.emit(res);
            if self.sh.exit_requested() {
                break;
            }
        }
        self.sh.shutdown();
    }
}
