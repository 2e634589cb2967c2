use super::ast::{self, ANON_FN_NAME};
use super::codegen::{CodeGen, SessionState};
use super::error::Error;
use super::ir::Module;
use super::jit::{ExecutionEngine, ModuleHandle};
use super::lexer::Scanner;
use super::parser::Parser;
use super::passes::PassManager;
use super::token::Token;
use std::io::{BufRead, Write};

pub(crate) struct Config {
    /// `None` suppresses the prompt.
    pub prompt: Option<String>,
    pub dump_ir: bool,
    pub optimize: bool,
    pub verbose: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            prompt: Some("tlang> ".to_owned()),
            dump_ir: false,
            optimize: true,
            verbose: false,
        }
    }
}

/// The read-eval-print loop. Named functions and imports accumulate in a
/// persistent module; every top-level expression is compiled into a module of
/// its own, run once and then dropped from the engine.
pub(crate) struct Session<R, W, E> {
    parser: Parser<R>,
    out: W,
    engine: E,
    state: SessionState,
    module: Module,
    resident: Option<ModuleHandle>,
    published: bool,
    fpm: PassManager,
    config: Config,
}

impl<R: BufRead, W: Write, E: ExecutionEngine> Session<R, W, E> {
    pub fn new(input: R, out: W, engine: E, config: Config) -> Self {
        let fpm = if config.optimize {
            PassManager::with_default_passes()
        } else {
            PassManager::new()
        };
        Session {
            parser: Parser::new(Scanner::new(input)),
            out,
            engine,
            state: SessionState::new(),
            module: Module::new("tlang"),
            resident: None,
            published: false,
            fpm,
            config,
        }
    }

    pub fn pass_names(&self) -> Vec<&'static str> {
        self.fpm.pass_names()
    }

    /// Runs until end of input or `exit`. Only fatal errors are returned;
    /// everything else goes to the transcript.
    pub fn run(&mut self) -> Result<(), Error> {
        self.prompt()?;
        self.parser.advance()?;
        loop {
            let token = self.parser.current().clone();
            match token {
                Token::Eof => break,
                Token::Exit => {
                    writeln!(self.out, "exiting...")?;
                    break;
                }
                Token::Kwd(';') => self.parser.advance()?,
                Token::Fn => self.handle_definition()?,
                Token::Import => self.handle_import()?,
                _ => self.handle_top_level_expr()?,
            }
            self.prompt()?;
        }

        if self.config.dump_ir {
            write!(self.out, "\n{}", self.module)?;
        }
        if let Some(handle) = self.resident.take() {
            self.engine.remove_module(handle);
        }
        self.out.flush()?;
        Ok(())
    }

    fn handle_definition(&mut self) -> Result<(), Error> {
        let func = match self.parser.parse_definition() {
            Ok(func) => func,
            Err(e) => return self.recover(e),
        };
        self.trace(&func);

        let ir = CodeGen::new(&mut self.state, &mut self.module)
            .codegen_func(&func, &self.fpm)
            .map(|f| f.to_string());
        match ir {
            Ok(ir) => {
                self.published = false;
                writeln!(self.out, "Read function definition: {}", func.proto.name)?;
                self.dump(&ir)
            }
            Err(e) => self.report(e),
        }
    }

    fn handle_import(&mut self) -> Result<(), Error> {
        let proto = match self.parser.parse_import() {
            Ok(proto) => proto,
            Err(e) => return self.recover(e),
        };
        if self.config.verbose {
            eprintln!("parsed import: {}", proto);
        }

        let ir = CodeGen::new(&mut self.state, &mut self.module)
            .codegen_extern(&proto)
            .map(|f| f.to_string());
        match ir {
            Ok(ir) => {
                self.published = false;
                writeln!(self.out, "Read import: {}", proto.name)?;
                self.dump(&ir)
            }
            Err(e) => self.report(e),
        }
    }

    fn handle_top_level_expr(&mut self) -> Result<(), Error> {
        let func = match self.parser.parse_top_level_expr() {
            Ok(func) => func,
            Err(e) => return self.recover(e),
        };
        self.trace(&func);

        let mut unit = Module::new(ANON_FN_NAME);
        let generated = CodeGen::new(&mut self.state, &mut unit)
            .codegen_func(&func, &self.fpm)
            .map(|_| ());
        if let Err(e) = generated {
            return self.report(e);
        }

        self.publish();
        let handle = self.engine.add_module(unit);
        let result = match self.engine.find_symbol(ANON_FN_NAME) {
            Some(symbol) => self.engine.invoke(&symbol, &[], &mut self.out),
            None => Err(Error::execution(format!("unresolved symbol '{}'", ANON_FN_NAME))),
        };
        self.engine.remove_module(handle);

        match result {
            Ok(value) => {
                writeln!(self.out, "Evaluated to {:.6}", value)?;
                Ok(())
            }
            Err(e) => self.report(e),
        }
    }

    /// Makes the engine see the current persistent module.
    fn publish(&mut self) {
        if self.published {
            return;
        }
        if let Some(handle) = self.resident.take() {
            self.engine.remove_module(handle);
        }
        self.resident = Some(self.engine.add_module(self.module.clone()));
        self.published = true;
    }

    /// Reports a parse error and skips the token it stopped at.
    fn recover(&mut self, e: Error) -> Result<(), Error> {
        self.report(e)?;
        self.parser.advance()
    }

    fn report(&mut self, e: Error) -> Result<(), Error> {
        if e.is_fatal() {
            return Err(e);
        }
        writeln!(self.out, "Error: {}", e)?;
        Ok(())
    }

    fn dump(&mut self, ir: &str) -> Result<(), Error> {
        if self.config.dump_ir {
            write!(self.out, "{}", ir)?;
        }
        Ok(())
    }

    fn trace(&self, func: &ast::Function) {
        if !self.config.verbose {
            return;
        }
        if func.is_anonymous() {
            eprintln!("parsed top-level expression: {}", func.body);
        } else {
            eprintln!("parsed definition: {}", func);
        }
    }

    fn prompt(&mut self) -> Result<(), Error> {
        if let Some(prompt) = &self.config.prompt {
            write!(self.out, "{}", prompt)?;
            self.out.flush()?;
        }
        Ok(())
    }

    #[cfg(test)]
    fn engine(&self) -> &E {
        &self.engine
    }
}
