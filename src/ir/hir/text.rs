//! Textual HIR reader.
//!
//! An S-expression form of the HIR, used by the CLI and the integration
//! tests to feed the lowerer without a front end:
//!
//! ```text
//! (module
//!   (fn main ()
//!     (var x 1)
//!     (return (+ x 2))))
//! ```
//!
//! A function is `(fn name (params…) flags… stmts…)`. Flags are `async`,
//! `generator`, `arrow`, `method`, `script`; a coroutine flag implies a
//! state scope named `$state_<name>`. Parameters and `var` heads accept a
//! representation annotation (`n:number`, `done:boolean`). Bindings resolve
//! in one flat per-function scope with `var` semantics: first mention
//! creates the binding, declaration before use is not required.

use crate::diagnostic::Diagnostic;
use crate::ir::{BindingId, CallableKind};
use crate::span::Span;

use super::{
    BinOp, BindingInfo, BindingRepr, CatchClause, HirExpr, HirFunction, HirModule, HirStmt, UnOp,
};

/// Parse a whole module. All errors are collected; `Err` carries every
/// diagnostic found rather than the first.
pub fn parse_module(source: &str, file_id: u16) -> Result<HirModule, Vec<Diagnostic>> {
    let mut reader = Reader::new(source, file_id);
    let forms = reader.read_all();

    let mut builder = Builder {
        file_id,
        diagnostics: reader.diagnostics,
    };
    let module = builder.module(&forms);

    if builder.diagnostics.is_empty() {
        Ok(module)
    } else {
        Err(builder.diagnostics)
    }
}

// ─── Forms ────────────────────────────────────────────────────────

/// One S-expression node.
#[derive(Debug, Clone)]
enum Form {
    List { items: Vec<Form>, span: Span },
    Symbol { text: String, span: Span },
    Number { value: f64, span: Span },
    Str { value: String, span: Span },
}

impl Form {
    fn span(&self) -> Span {
        match self {
            Form::List { span, .. }
            | Form::Symbol { span, .. }
            | Form::Number { span, .. }
            | Form::Str { span, .. } => *span,
        }
    }

    /// The head symbol of a list form, when it has one.
    fn head(&self) -> Option<&str> {
        match self {
            Form::List { items, .. } => match items.first() {
                Some(Form::Symbol { text, .. }) => Some(text),
                _ => None,
            },
            _ => None,
        }
    }
}

// ─── Reader: source text to forms ─────────────────────────────────

struct Reader<'src> {
    source: &'src [u8],
    file_id: u16,
    pos: usize,
    diagnostics: Vec<Diagnostic>,
}

impl<'src> Reader<'src> {
    fn new(source: &'src str, file_id: u16) -> Self {
        Self {
            source: source.as_bytes(),
            file_id,
            pos: 0,
            diagnostics: Vec::new(),
        }
    }

    fn read_all(&mut self) -> Vec<Form> {
        let mut forms = Vec::new();
        while let Some(form) = self.read_form() {
            forms.push(form);
        }
        forms
    }

    fn skip_trivia(&mut self) {
        loop {
            while self.pos < self.source.len() && self.source[self.pos].is_ascii_whitespace() {
                self.pos += 1;
            }
            // `;` comments run to end of line.
            if self.pos < self.source.len() && self.source[self.pos] == b';' {
                while self.pos < self.source.len() && self.source[self.pos] != b'\n' {
                    self.pos += 1;
                }
                continue;
            }
            break;
        }
    }

    fn span_from(&self, start: usize) -> Span {
        Span::new(self.file_id, start as u32, self.pos as u32)
    }

    fn read_form(&mut self) -> Option<Form> {
        loop {
            self.skip_trivia();
            if self.pos >= self.source.len() {
                return None;
            }

            let start = self.pos;
            match self.source[self.pos] {
                b'(' => {
                    self.pos += 1;
                    return Some(self.read_list(start));
                }
                b')' => {
                    self.pos += 1;
                    self.diagnostics
                        .push(Diagnostic::error("unexpected `)`", self.span_from(start)));
                    // Skip it and read whatever follows.
                }
                b'"' => return Some(self.read_string(start)),
                _ => return Some(self.read_atom(start)),
            }
        }
    }

    fn read_list(&mut self, open: usize) -> Form {
        let mut items = Vec::new();
        loop {
            self.skip_trivia();
            if self.pos >= self.source.len() {
                self.diagnostics.push(
                    Diagnostic::error(
                        "unclosed form",
                        Span::new(self.file_id, open as u32, (open + 1) as u32),
                    )
                    .with_note("opened here"),
                );
                break;
            }
            if self.source[self.pos] == b')' {
                self.pos += 1;
                break;
            }
            match self.read_form() {
                Some(form) => items.push(form),
                // EOF is caught before the read; a form always follows.
                None => break,
            }
        }
        Form::List {
            items,
            span: self.span_from(open),
        }
    }

    fn read_string(&mut self, open: usize) -> Form {
        self.pos += 1; // opening quote
        let mut value = String::new();
        loop {
            if self.pos >= self.source.len() || self.source[self.pos] == b'\n' {
                self.diagnostics.push(Diagnostic::error(
                    "unterminated string literal",
                    self.span_from(open),
                ));
                break;
            }
            match self.source[self.pos] {
                b'"' => {
                    self.pos += 1;
                    break;
                }
                b'\\' => {
                    self.pos += 1;
                    let escape = self.source.get(self.pos).copied();
                    if escape.is_some() {
                        self.pos += 1;
                    }
                    match escape {
                        Some(b'n') => value.push('\n'),
                        Some(b't') => value.push('\t'),
                        Some(b'"') => value.push('"'),
                        Some(b'\\') => value.push('\\'),
                        Some(ch) => {
                            self.diagnostics.push(Diagnostic::error(
                                format!("unknown string escape `\\{}`", ch as char),
                                self.span_from(self.pos.saturating_sub(2)),
                            ));
                        }
                        // EOF: the next iteration reports the unterminated
                        // literal.
                        None => {}
                    }
                }
                _ => {
                    // Multi-byte UTF-8 is fine: only ASCII bytes terminate.
                    let ch_start = self.pos;
                    self.pos += 1;
                    while self.pos < self.source.len() && self.source[self.pos] & 0xc0 == 0x80 {
                        self.pos += 1;
                    }
                    if let Ok(text) = std::str::from_utf8(&self.source[ch_start..self.pos]) {
                        value.push_str(text);
                    }
                }
            }
        }
        Form::Str {
            value,
            span: self.span_from(open),
        }
    }

    fn read_atom(&mut self, start: usize) -> Form {
        while self.pos < self.source.len() && !is_atom_end(self.source[self.pos]) {
            self.pos += 1;
        }
        let text = std::str::from_utf8(&self.source[start..self.pos])
            .unwrap_or_default()
            .to_string();
        let span = self.span_from(start);

        if looks_numeric(&text) {
            return match text.parse::<f64>() {
                Ok(value) => Form::Number { value, span },
                Err(_) => {
                    self.diagnostics.push(Diagnostic::error(
                        format!("malformed number literal `{}`", text),
                        span,
                    ));
                    Form::Number { value: 0.0, span }
                }
            };
        }
        Form::Symbol { text, span }
    }
}

fn is_atom_end(ch: u8) -> bool {
    ch.is_ascii_whitespace() || matches!(ch, b'(' | b')' | b'"' | b';')
}

/// Only atoms that start like a number are parsed as one, so `-` and `+`
/// stay operator symbols and a variable named `inf` stays a variable.
fn looks_numeric(text: &str) -> bool {
    let bytes = text.as_bytes();
    match bytes.first() {
        Some(b'0'..=b'9') => true,
        Some(b'-') | Some(b'+') => matches!(bytes.get(1), Some(b'0'..=b'9') | Some(b'.')),
        Some(b'.') => matches!(bytes.get(1), Some(b'0'..=b'9')),
        _ => false,
    }
}

// ─── Per-function binding table ───────────────────────────────────

struct Bindings {
    table: Vec<BindingInfo>,
}

impl Bindings {
    fn new() -> Self {
        Self { table: Vec::new() }
    }

    /// Lookup-or-create; every mention of a name lands in one flat scope.
    fn resolve(&mut self, name: &str) -> BindingId {
        if let Some(index) = self.table.iter().position(|b| b.name == name) {
            return BindingId(index as u32);
        }
        let id = BindingId(self.table.len() as u32);
        self.table.push(BindingInfo {
            name: name.to_string(),
            repr: BindingRepr::Dynamic,
        });
        id
    }

    fn set_repr(&mut self, id: BindingId, repr: BindingRepr) {
        self.table[id.0 as usize].repr = repr;
    }
}

// ─── Builder: forms to HIR ────────────────────────────────────────

struct Builder {
    file_id: u16,
    diagnostics: Vec<Diagnostic>,
}

impl Builder {
    fn error(&mut self, message: impl Into<String>, span: Span) {
        self.diagnostics.push(Diagnostic::error(message, span));
    }

    fn module(&mut self, forms: &[Form]) -> HirModule {
        let module_form = match forms {
            [] => {
                self.error("empty input: expected `(module …)`", Span::point(self.file_id, 0));
                return HirModule::default();
            }
            [single] => single,
            [_, extra, ..] => {
                self.error("expected a single `(module …)` form", extra.span());
                &forms[0]
            }
        };

        let items = match module_form {
            Form::List { items, .. } if module_form.head() == Some("module") => &items[1..],
            _ => {
                self.error("expected `(module …)` at top level", module_form.span());
                return HirModule::default();
            }
        };

        let mut functions = Vec::new();
        for item in items {
            if let Some(func) = self.function(item) {
                functions.push(func);
            }
        }
        HirModule { functions }
    }

    fn function(&mut self, form: &Form) -> Option<HirFunction> {
        let items = match form {
            Form::List { items, .. } if form.head() == Some("fn") => items,
            _ => {
                self.error("expected `(fn …)` inside module", form.span());
                return None;
            }
        };

        let name = match items.get(1) {
            Some(Form::Symbol { text, .. }) => text.clone(),
            other => {
                let span = other.map_or(form.span(), Form::span);
                self.error("expected function name after `fn`", span);
                return None;
            }
        };

        let mut bindings = Bindings::new();
        let params = match items.get(2) {
            Some(Form::List { items: params, .. }) => {
                let mut ids = Vec::with_capacity(params.len());
                for param in params {
                    if let Some(id) = self.annotated_binding(param, &mut bindings) {
                        ids.push(id);
                    }
                }
                ids
            }
            other => {
                let span = other.map_or(form.span(), Form::span);
                self.error("expected parameter list after function name", span);
                return None;
            }
        };

        let mut kind = CallableKind::Function;
        let mut is_async = false;
        let mut is_generator = false;
        let mut body_start = items.len();
        for (index, item) in items.iter().enumerate().skip(3) {
            match item {
                Form::Symbol { text, span } => match text.as_str() {
                    "async" => is_async = true,
                    "generator" => is_generator = true,
                    "function" => kind = CallableKind::Function,
                    "arrow" => kind = CallableKind::Arrow,
                    "method" => kind = CallableKind::Method,
                    "script" => kind = CallableKind::Script,
                    other => {
                        self.error(format!("unknown function flag `{}`", other), *span);
                    }
                },
                _ => {
                    body_start = index;
                    break;
                }
            }
        }

        let body = self.stmt_list(&items[body_start.min(items.len())..], &mut bindings);

        let state_scope = (is_async || is_generator).then(|| format!("$state_{}", name));

        Some(HirFunction {
            name,
            kind,
            is_async,
            is_generator,
            params,
            bindings: bindings.table,
            state_scope,
            body,
        })
    }

    /// A binding mention with an optional `name:number` / `name:boolean`
    /// representation annotation.
    fn annotated_binding(&mut self, form: &Form, bindings: &mut Bindings) -> Option<BindingId> {
        let (text, span) = match form {
            Form::Symbol { text, span } => (text.as_str(), *span),
            _ => {
                self.error("expected a binding name", form.span());
                return None;
            }
        };

        match text.split_once(':') {
            None => Some(bindings.resolve(text)),
            Some((name, annotation)) => {
                let repr = match annotation {
                    "number" => BindingRepr::Number,
                    "boolean" => BindingRepr::Boolean,
                    "dynamic" => BindingRepr::Dynamic,
                    other => {
                        self.error(format!("unknown representation annotation `:{}`", other), span);
                        BindingRepr::Dynamic
                    }
                };
                let id = bindings.resolve(name);
                bindings.set_repr(id, repr);
                Some(id)
            }
        }
    }

    // ─── Statements ───────────────────────────────────────────────

    fn stmt_list(&mut self, forms: &[Form], bindings: &mut Bindings) -> Vec<HirStmt> {
        forms
            .iter()
            .filter_map(|form| self.stmt(form, bindings))
            .collect()
    }

    fn stmt(&mut self, form: &Form, bindings: &mut Bindings) -> Option<HirStmt> {
        let items = match form {
            Form::List { items, .. } => items,
            _ => {
                self.error("expected a statement form", form.span());
                return None;
            }
        };
        let head = match form.head() {
            Some(head) => head,
            None => {
                self.error("expected a statement head symbol", form.span());
                return None;
            }
        };
        let args = &items[1..];

        match head {
            "loc" => {
                let start = self.small_uint(args.first(), form.span())?;
                let end = self.small_uint(args.get(1), form.span())?;
                Some(HirStmt::SequencePoint(Span::new(self.file_id, start, end)))
            }
            "var" => {
                let name_form = self.required(args.first(), "a binding name", form.span())?;
                let binding = self.annotated_binding(name_form, bindings)?;
                let init = match args.get(1) {
                    Some(form) => Some(self.expr(form, bindings)?),
                    None => None,
                };
                Some(HirStmt::VarDecl { binding, init })
            }
            "expr" => {
                let value_form = self.required(args.first(), "an expression", form.span())?;
                let expr = self.expr(value_form, bindings)?;
                Some(HirStmt::Expr(expr))
            }
            "return" => {
                let value = match args.first() {
                    Some(form) => Some(self.expr(form, bindings)?),
                    None => None,
                };
                Some(HirStmt::Return(value))
            }
            "if" => {
                let test_form = self.required(args.first(), "a test expression", form.span())?;
                let test = self.expr(test_form, bindings)?;
                let consequent = match self.clause(args, "then", bindings) {
                    Some(block) => block,
                    None => {
                        self.error("`if` needs a `(then …)` clause", form.span());
                        return None;
                    }
                };
                let alternate = self.clause(args, "else", bindings);
                Some(HirStmt::If {
                    test,
                    consequent,
                    alternate,
                })
            }
            "while" => {
                let test_form = self.required(args.first(), "a test expression", form.span())?;
                let test = self.expr(test_form, bindings)?;
                let body = self.stmt_list(&args[1..], bindings);
                Some(HirStmt::While { test, body })
            }
            // Body runs before the first test, as in source `do … while`.
            "do-while" => {
                let test_form = self.required(args.first(), "a test expression", form.span())?;
                let test = self.expr(test_form, bindings)?;
                let body = self.stmt_list(&args[1..], bindings);
                Some(HirStmt::DoWhile { body, test })
            }
            "for" => {
                let init = match self.placeholder(args.first())? {
                    None => None,
                    Some(form) => Some(Box::new(self.stmt(form, bindings)?)),
                };
                let test = match self.placeholder(args.get(1))? {
                    None => None,
                    Some(form) => Some(self.expr(form, bindings)?),
                };
                let update = match self.placeholder(args.get(2))? {
                    None => None,
                    Some(form) => Some(self.expr(form, bindings)?),
                };
                let body = self.stmt_list(args.get(3..).unwrap_or(&[]), bindings);
                Some(HirStmt::For {
                    init,
                    test,
                    update,
                    body,
                })
            }
            "block" => Some(HirStmt::Block(self.stmt_list(args, bindings))),
            "label" => {
                let name = self.symbol(args.first(), form.span())?;
                let body_form = self.required(args.get(1), "a labeled statement", form.span())?;
                let body = self.stmt(body_form, bindings)?;
                Some(HirStmt::Labeled {
                    name,
                    body: Box::new(body),
                })
            }
            "break" => Some(HirStmt::Break {
                label: self.optional_symbol(args.first()),
            }),
            "continue" => Some(HirStmt::Continue {
                label: self.optional_symbol(args.first()),
            }),
            "throw" => {
                let value_form = self.required(args.first(), "an expression", form.span())?;
                let value = self.expr(value_form, bindings)?;
                Some(HirStmt::Throw(value))
            }
            "try" => self.try_stmt(args, form.span(), bindings),
            other => {
                self.error(format!("unknown statement head `{}`", other), form.span());
                None
            }
        }
    }

    /// `(try (body …) (catch name …) (finally …))`; catch and finally are
    /// optional, `catch _` binds nothing.
    fn try_stmt(
        &mut self,
        args: &[Form],
        span: Span,
        bindings: &mut Bindings,
    ) -> Option<HirStmt> {
        let try_block = match self.clause(args, "body", bindings) {
            Some(block) => block,
            None => {
                self.error("`try` needs a `(body …)` clause", span);
                return None;
            }
        };

        let catch = args
            .iter()
            .find(|form| form.head() == Some("catch"))
            .and_then(|form| match form {
                Form::List { items, .. } => {
                    let binding = match items.get(1) {
                        Some(Form::Symbol { text, .. }) if text == "_" => None,
                        Some(name_form) => self.annotated_binding(name_form, bindings),
                        None => {
                            self.error("`catch` needs a binding name or `_`", form.span());
                            return None;
                        }
                    };
                    let body = self.stmt_list(items.get(2..).unwrap_or(&[]), bindings);
                    Some(CatchClause { binding, body })
                }
                _ => None,
            });

        let finally = self.clause(args, "finally", bindings);

        Some(HirStmt::Try {
            try_block,
            catch,
            finally,
        })
    }

    /// Find and read a `(head stmts…)` clause among a form's arguments.
    fn clause(&mut self, args: &[Form], head: &str, bindings: &mut Bindings) -> Option<Vec<HirStmt>> {
        let form = args.iter().find(|form| form.head() == Some(head))?;
        match form {
            Form::List { items, .. } => Some(self.stmt_list(&items[1..], bindings)),
            _ => None,
        }
    }

    /// `_` marks an absent optional position (e.g. a `for` with no test).
    fn placeholder<'f>(&mut self, form: Option<&'f Form>) -> Option<Option<&'f Form>> {
        match form {
            None => Some(None),
            Some(Form::Symbol { text, .. }) if text == "_" => Some(None),
            Some(form) => Some(Some(form)),
        }
    }

    // ─── Expressions ──────────────────────────────────────────────

    fn expr(&mut self, form: &Form, bindings: &mut Bindings) -> Option<HirExpr> {
        match form {
            Form::Number { value, .. } => Some(HirExpr::Number(*value)),
            Form::Str { value, .. } => Some(HirExpr::Str(value.clone())),
            Form::Symbol { text, .. } => Some(match text.as_str() {
                "true" => HirExpr::Bool(true),
                "false" => HirExpr::Bool(false),
                "null" => HirExpr::Null,
                "undefined" => HirExpr::Undefined,
                _ => HirExpr::Var(bindings.resolve(text)),
            }),
            Form::List { items, .. } => self.compound_expr(form, items, bindings),
        }
    }

    fn compound_expr(
        &mut self,
        form: &Form,
        items: &[Form],
        bindings: &mut Bindings,
    ) -> Option<HirExpr> {
        let head = match form.head() {
            Some(head) => head,
            None => {
                self.error("expected an expression head symbol", form.span());
                return None;
            }
        };
        let args = &items[1..];

        if let Some(op) = BinOp::from_symbol(head) {
            let left_form = self.required(args.first(), "a left operand", form.span())?;
            let left = self.expr(left_form, bindings)?;
            let right_form = self.required(args.get(1), "a right operand", form.span())?;
            let right = self.expr(right_form, bindings)?;
            return Some(HirExpr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            });
        }
        if let Some(op) = UnOp::from_symbol(head) {
            let operand_form = self.required(args.first(), "an operand", form.span())?;
            let operand = self.expr(operand_form, bindings)?;
            return Some(HirExpr::Unary {
                op,
                operand: Box::new(operand),
            });
        }

        match head {
            "set!" => {
                let name = self.symbol(args.first(), form.span())?;
                let target = bindings.resolve(&name);
                let value_form = self.required(args.get(1), "a value expression", form.span())?;
                let value = self.expr(value_form, bindings)?;
                Some(HirExpr::Assign {
                    target,
                    value: Box::new(value),
                })
            }
            "call" | "call?" => {
                let callee_form = self.required(args.first(), "a callee", form.span())?;
                let callee = Box::new(self.expr(callee_form, bindings)?);
                let mut call_args = Vec::with_capacity(args.len().saturating_sub(1));
                for arg in &args[1..] {
                    call_args.push(self.expr(arg, bindings)?);
                }
                Some(if head == "call" {
                    HirExpr::Call {
                        callee,
                        args: call_args,
                    }
                } else {
                    HirExpr::OptionalCall {
                        callee,
                        args: call_args,
                    }
                })
            }
            "await" => {
                let operand_form = self.required(args.first(), "an operand", form.span())?;
                let operand = self.expr(operand_form, bindings)?;
                Some(HirExpr::Await(Box::new(operand)))
            }
            "yield" | "yield*" => {
                let argument = match args.first() {
                    Some(form) => Some(Box::new(self.expr(form, bindings)?)),
                    None => None,
                };
                Some(HirExpr::Yield {
                    argument,
                    delegate: head == "yield*",
                })
            }
            "import" => {
                let spec_form = self.required(args.first(), "a module specifier", form.span())?;
                let specifier = self.expr(spec_form, bindings)?;
                Some(HirExpr::Import(Box::new(specifier)))
            }
            other => {
                self.error(format!("unknown expression head `{}`", other), form.span());
                None
            }
        }
    }

    // ─── Small helpers ────────────────────────────────────────────

    fn required<'f>(
        &mut self,
        form: Option<&'f Form>,
        what: &str,
        fallback: Span,
    ) -> Option<&'f Form> {
        match form {
            Some(form) => Some(form),
            None => {
                self.error(format!("expected {}", what), fallback);
                None
            }
        }
    }

    fn symbol(&mut self, form: Option<&Form>, fallback: Span) -> Option<String> {
        match form {
            Some(Form::Symbol { text, .. }) => Some(text.clone()),
            other => {
                let span = other.map_or(fallback, |f| f.span());
                self.error("expected a name", span);
                None
            }
        }
    }

    fn optional_symbol(&mut self, form: Option<&Form>) -> Option<String> {
        match form {
            Some(Form::Symbol { text, .. }) => Some(text.clone()),
            _ => None,
        }
    }

    fn small_uint(&mut self, form: Option<&Form>, fallback: Span) -> Option<u32> {
        match form {
            Some(Form::Number { value, span }) => {
                if *value >= 0.0 && value.fract() == 0.0 && *value <= u32::MAX as f64 {
                    Some(*value as u32)
                } else {
                    self.error("expected a non-negative integer", *span);
                    None
                }
            }
            other => {
                let span = other.map_or(fallback, |f| f.span());
                self.error("expected a number", span);
                None
            }
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────
