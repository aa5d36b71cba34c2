//! Recursive-descent parser for sable source
//!
//! Builds the `ast::Node` tree from the lexer's token list. Errors are
//! plain strings with line/column, wrapped into `ParseError` at the
//! interpreter boundary. Ambiguous spots (casts, generic call type
//! arguments, declarations versus expressions) parse speculatively with
//! position rollback.

use crate::ast::*;
use crate::lexer::{self, IntSuffix, RawInterpPart, Tok, Token};
use sable_core::kind::Kind;
use sable_runtime::decimal::Dec;
use std::rc::Rc;

/// Parse a whole program into a hoisting statement list.
pub fn parse_program(source: &str) -> Result<Node, String> {
    let tokens = lexer::tokenize(source)?;
    let mut p = Parser { tokens, pos: 0 };
    let mut items = Vec::new();
    while !p.at_eof() {
        items.push(p.parse_statement()?);
    }
    Ok(Node::StatementList(items))
}

/// Parse a single expression (interpolation holes).
fn parse_expression_source(source: &str, line: usize, column: usize) -> Result<Node, String> {
    let tokens = lexer::tokenize(source)
        .map_err(|e| format!("in interpolation at {line}:{column}: {e}"))?;
    let mut p = Parser { tokens, pos: 0 };
    let node = p.parse_expr()?;
    if !p.at_eof() {
        return Err(format!(
            "in interpolation at {line}:{column}: trailing tokens"
        ));
    }
    Ok(node)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    // ---- token plumbing ----

    fn peek(&self) -> &Tok {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].kind
    }

    fn peek_at(&self, n: usize) -> &Tok {
        &self.tokens[(self.pos + n).min(self.tokens.len() - 1)].kind
    }

    fn here(&self) -> (usize, usize) {
        let t = &self.tokens[self.pos.min(self.tokens.len() - 1)];
        (t.line, t.column)
    }

    fn fail<T>(&self, what: &str) -> Result<T, String> {
        let (line, column) = self.here();
        Err(format!("parse error at {line}:{column}: {what}"))
    }

    fn at_eof(&self) -> bool {
        matches!(self.peek(), Tok::Eof)
    }

    fn bump(&mut self) -> Tok {
        let t = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        t
    }

    fn at_punct(&self, p: &str) -> bool {
        matches!(self.peek(), Tok::Punct(q) if *q == p)
    }

    fn eat_punct(&mut self, p: &str) -> bool {
        if self.at_punct(p) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, p: &str) -> Result<(), String> {
        if self.eat_punct(p) {
            Ok(())
        } else {
            self.fail(&format!("expected '{p}'"))
        }
    }

    fn at_word(&self, w: &str) -> bool {
        matches!(self.peek(), Tok::Ident(s) if s == w)
    }

    fn eat_word(&mut self, w: &str) -> bool {
        if self.at_word(w) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect_word(&mut self, w: &str) -> Result<(), String> {
        if self.eat_word(w) {
            Ok(())
        } else {
            self.fail(&format!("expected '{w}'"))
        }
    }

    fn expect_ident(&mut self) -> Result<String, String> {
        match self.peek().clone() {
            Tok::Ident(s) => {
                self.bump();
                Ok(s)
            }
            _ => self.fail("expected a name"),
        }
    }

    // ---- types ----

    fn looks_like_type_start(&self) -> bool {
        match self.peek() {
            Tok::Ident(s) => s == "var" || !is_reserved(s),
            _ => false,
        }
    }

    fn parse_type(&mut self) -> Result<TypeRef, String> {
        let name = self.expect_ident()?;
        let mut base = if name == "var" {
            TypeRef::Var
        } else if let Some(kind) = Kind::from_name(&name) {
            TypeRef::Kind(kind)
        } else if self.at_punct("<") {
            // Name<T, …>
            self.bump();
            let mut args = Vec::new();
            loop {
                args.push(self.parse_type()?);
                if self.eat_punct(",") {
                    continue;
                }
                self.expect_punct(">")?;
                break;
            }
            TypeRef::Generic(name, args)
        } else {
            let mut dotted = name;
            while self.at_punct(".") && matches!(self.peek_at(1), Tok::Ident(_)) {
                self.bump();
                dotted.push('.');
                dotted.push_str(&self.expect_ident()?);
            }
            TypeRef::Named(dotted)
        };
        loop {
            if self.at_punct("?") && !self.at_ternary_tail() {
                self.bump();
                base = TypeRef::Nullable(Box::new(base));
            } else if self.at_punct("[") && matches!(self.peek_at(1), Tok::Punct("]")) {
                self.bump();
                self.bump();
                base = TypeRef::Array(Box::new(base));
            } else {
                return Ok(base);
            }
        }
    }

    /// Inside expressions, `x ? a : b` must not read the `?` as a
    /// nullable marker. Only treat `?` as part of a type when a type-ish
    /// token follows.
    fn at_ternary_tail(&self) -> bool {
        !matches!(
            self.peek_at(1),
            Tok::Punct(")") | Tok::Punct("]") | Tok::Punct(",") | Tok::Punct(">") | Tok::Ident(_)
        )
    }

    // ---- statements ----

    fn parse_statement(&mut self) -> Result<Node, String> {
        match self.peek().clone() {
            Tok::Punct(";") => {
                self.bump();
                Ok(Node::Empty)
            }
            Tok::Punct("{") => self.parse_block(),
            Tok::Punct("[") => {
                // Attributes introduce a function declaration
                let attributes = self.parse_attributes()?;
                self.parse_function_decl(attributes)
            }
            Tok::Ident(word) => match word.as_str() {
                "if" => self.parse_if(),
                "while" => self.parse_while(),
                "do" => self.parse_do_while(),
                "for" => self.parse_for(),
                "foreach" => self.parse_foreach(),
                "switch" => self.parse_switch(),
                "try" => self.parse_try(),
                "throw" => {
                    self.bump();
                    let expr = if self.at_punct(";") {
                        None
                    } else {
                        Some(Box::new(self.parse_expr()?))
                    };
                    self.expect_punct(";")?;
                    Ok(Node::Throw(expr))
                }
                "return" => {
                    self.bump();
                    let expr = if self.at_punct(";") {
                        None
                    } else {
                        Some(Box::new(self.parse_expr()?))
                    };
                    self.expect_punct(";")?;
                    Ok(Node::Return(expr))
                }
                "break" => {
                    self.bump();
                    self.expect_punct(";")?;
                    Ok(Node::Break)
                }
                "continue" => {
                    self.bump();
                    self.expect_punct(";")?;
                    Ok(Node::Continue)
                }
                "goto" => self.parse_goto(),
                "using" => self.parse_using(),
                "namespace" => self.parse_namespace(),
                "struct" => self.parse_type_decl(false),
                "class" => self.parse_type_decl(true),
                "interface" => self.parse_interface(),
                "enum" => self.parse_enum(),
                "public" | "static" => self.parse_function_decl(Vec::new()),
                _ => {
                    // Label?
                    if matches!(self.peek_at(1), Tok::Punct(":"))
                        && !is_reserved(&word)
                        && !matches!(self.peek_at(2), Tok::Punct(":"))
                    {
                        self.bump();
                        self.bump();
                        return Ok(Node::Label(word));
                    }
                    self.parse_declaration_or_expression()
                }
            },
            _ => self.parse_declaration_or_expression(),
        }
    }

    fn parse_block(&mut self) -> Result<Node, String> {
        self.expect_punct("{")?;
        let mut items = Vec::new();
        while !self.eat_punct("}") {
            if self.at_eof() {
                return self.fail("unterminated block");
            }
            items.push(self.parse_statement()?);
        }
        Ok(Node::Block(items))
    }

    /// Local declaration, function declaration, deconstruction or a bare
    /// expression statement. Resolved by speculation with rollback.
    fn parse_declaration_or_expression(&mut self) -> Result<Node, String> {
        // var (a, b) = e;  /  (a, b) = e;
        if let Some(node) = self.try_parse_deconstruct()? {
            return Ok(node);
        }
        if self.looks_like_type_start() {
            let save = self.pos;
            if let Ok(ty) = self.parse_type() {
                if let Tok::Ident(name) = self.peek().clone()
                    && !is_reserved(&name)
                {
                    match self.peek_at(1) {
                        // Type name (  → function declaration
                        Tok::Punct("(") | Tok::Punct("<") if !matches!(ty, TypeRef::Var) => {
                            self.pos = save;
                            return self.parse_function_decl(Vec::new());
                        }
                        Tok::Punct("=") | Tok::Punct(";") => {
                            self.bump();
                            let init = if self.eat_punct("=") {
                                Some(Box::new(self.parse_expr()?))
                            } else {
                                None
                            };
                            self.expect_punct(";")?;
                            return Ok(Node::VariableDecl { ty, name, init });
                        }
                        _ => {}
                    }
                }
            }
            self.pos = save;
        }
        let expr = self.parse_expr()?;
        self.expect_punct(";")?;
        Ok(expr)
    }

    fn try_parse_deconstruct(&mut self) -> Result<Option<Node>, String> {
        let save = self.pos;
        let declare = self.at_word("var") && matches!(self.peek_at(1), Tok::Punct("("));
        if declare {
            self.bump();
        } else if !self.at_punct("(") {
            return Ok(None);
        }
        if !self.eat_punct("(") {
            self.pos = save;
            return Ok(None);
        }
        let mut names = Vec::new();
        loop {
            match self.peek().clone() {
                Tok::Ident(n) if !is_reserved(&n) || n == "_" => {
                    self.bump();
                    names.push(n);
                }
                _ => {
                    self.pos = save;
                    return Ok(None);
                }
            }
            if self.eat_punct(",") {
                continue;
            }
            break;
        }
        if names.len() < 2 || !self.eat_punct(")") || !self.eat_punct("=") {
            self.pos = save;
            return Ok(None);
        }
        let value = Box::new(self.parse_expr()?);
        self.expect_punct(";")?;
        Ok(Some(Node::Deconstruct { names, declare, value }))
    }

    fn parse_if(&mut self) -> Result<Node, String> {
        self.expect_word("if")?;
        self.expect_punct("(")?;
        let cond = Box::new(self.parse_expr()?);
        self.expect_punct(")")?;
        let then = Box::new(self.parse_statement()?);
        let other = if self.eat_word("else") {
            Some(Box::new(self.parse_statement()?))
        } else {
            None
        };
        Ok(Node::If { cond, then, other })
    }

    fn parse_while(&mut self) -> Result<Node, String> {
        self.expect_word("while")?;
        self.expect_punct("(")?;
        let cond = Box::new(self.parse_expr()?);
        self.expect_punct(")")?;
        let body = Box::new(self.parse_statement()?);
        Ok(Node::While { cond, body })
    }

    fn parse_do_while(&mut self) -> Result<Node, String> {
        self.expect_word("do")?;
        let body = Box::new(self.parse_statement()?);
        self.expect_word("while")?;
        self.expect_punct("(")?;
        let cond = Box::new(self.parse_expr()?);
        self.expect_punct(")")?;
        self.expect_punct(";")?;
        Ok(Node::DoWhile { body, cond })
    }

    fn parse_for(&mut self) -> Result<Node, String> {
        self.expect_word("for")?;
        self.expect_punct("(")?;
        let init = if self.at_punct(";") {
            self.bump();
            None
        } else {
            Some(Box::new(self.parse_for_init()?))
        };
        let cond = if self.at_punct(";") {
            None
        } else {
            Some(Box::new(self.parse_expr()?))
        };
        self.expect_punct(";")?;
        let step = if self.at_punct(")") {
            None
        } else {
            Some(Box::new(self.parse_expr()?))
        };
        self.expect_punct(")")?;
        let body = Box::new(self.parse_statement()?);
        Ok(Node::For { init, cond, step, body })
    }

    /// The initializer of a `for` is a declaration or expression
    /// terminated by ';' (which this consumes).
    fn parse_for_init(&mut self) -> Result<Node, String> {
        if self.looks_like_type_start() {
            let save = self.pos;
            if let Ok(ty) = self.parse_type()
                && let Tok::Ident(name) = self.peek().clone()
                && !is_reserved(&name)
                && matches!(self.peek_at(1), Tok::Punct("=") | Tok::Punct(";"))
            {
                self.bump();
                let init = if self.eat_punct("=") {
                    Some(Box::new(self.parse_expr()?))
                } else {
                    None
                };
                self.expect_punct(";")?;
                return Ok(Node::VariableDecl { ty, name, init });
            }
            self.pos = save;
        }
        let expr = self.parse_expr()?;
        self.expect_punct(";")?;
        Ok(expr)
    }

    fn parse_foreach(&mut self) -> Result<Node, String> {
        self.expect_word("foreach")?;
        self.expect_punct("(")?;
        let ty = self.parse_type()?;
        let var = self.expect_ident()?;
        self.expect_word("in")?;
        let iterable = Box::new(self.parse_expr()?);
        self.expect_punct(")")?;
        let body = Box::new(self.parse_statement()?);
        Ok(Node::Foreach { ty, var, iterable, body })
    }

    fn parse_switch(&mut self) -> Result<Node, String> {
        self.expect_word("switch")?;
        self.expect_punct("(")?;
        let subject = Box::new(self.parse_expr()?);
        self.expect_punct(")")?;
        self.expect_punct("{")?;
        let mut sections = Vec::new();
        while !self.eat_punct("}") {
            let mut labels = Vec::new();
            loop {
                if self.eat_word("default") {
                    self.expect_punct(":")?;
                    labels.push(CaseLabel::Default);
                } else if self.eat_word("case") {
                    let pattern = self.parse_pattern()?;
                    let guard = if self.eat_word("when") {
                        Some(Box::new(self.parse_expr()?))
                    } else {
                        None
                    };
                    self.expect_punct(":")?;
                    labels.push(CaseLabel::Pattern { pattern, guard });
                } else {
                    break;
                }
            }
            if labels.is_empty() {
                return self.fail("expected 'case' or 'default'");
            }
            let mut body = Vec::new();
            while !self.at_word("case") && !self.at_word("default") && !self.at_punct("}") {
                if self.at_eof() {
                    return self.fail("unterminated switch");
                }
                body.push(self.parse_statement()?);
            }
            sections.push(SwitchSection { labels, body });
        }
        Ok(Node::Switch { subject, sections })
    }

    fn parse_try(&mut self) -> Result<Node, String> {
        self.expect_word("try")?;
        let body = Box::new(self.parse_block()?);
        let mut catches = Vec::new();
        while self.eat_word("catch") {
            let (filter, binding) = if self.eat_punct("(") {
                let filter = self.expect_ident()?;
                let binding = match self.peek().clone() {
                    Tok::Ident(b) if !is_reserved(&b) => {
                        self.bump();
                        Some(b)
                    }
                    _ => None,
                };
                self.expect_punct(")")?;
                (Some(filter), binding)
            } else {
                (None, None)
            };
            let body = Box::new(self.parse_block()?);
            catches.push(CatchClause { filter, binding, body });
        }
        let finally = if self.eat_word("finally") {
            Some(Box::new(self.parse_block()?))
        } else {
            None
        };
        if catches.is_empty() && finally.is_none() {
            return self.fail("try needs a catch or finally");
        }
        Ok(Node::Try { body, catches, finally })
    }

    fn parse_goto(&mut self) -> Result<Node, String> {
        self.expect_word("goto")?;
        if self.eat_word("default") {
            self.expect_punct(";")?;
            return Ok(Node::GotoCase(None));
        }
        if self.eat_word("case") {
            let c = self.parse_const_literal()?;
            self.expect_punct(";")?;
            return Ok(Node::GotoCase(Some(c)));
        }
        let label = self.expect_ident()?;
        self.expect_punct(";")?;
        Ok(Node::Goto(label))
    }

    fn parse_using(&mut self) -> Result<Node, String> {
        self.expect_word("using")?;
        if self.eat_punct("(") {
            let decl = Box::new(self.parse_using_decl()?);
            self.expect_punct(")")?;
            let body = Some(Box::new(self.parse_statement()?));
            return Ok(Node::UsingScoped { decl, body });
        }
        // `using var x = e;` is a declaration scoped to the enclosing block
        if self.at_word("var") || (self.looks_like_type_start() && self.is_decl_ahead()) {
            let decl = Box::new(self.parse_using_decl()?);
            self.expect_punct(";")?;
            return Ok(Node::UsingScoped { decl, body: None });
        }
        let mut name = self.expect_ident()?;
        while self.eat_punct(".") {
            name.push('.');
            name.push_str(&self.expect_ident()?);
        }
        self.expect_punct(";")?;
        Ok(Node::UsingImport(name))
    }

    fn is_decl_ahead(&mut self) -> bool {
        let save = self.pos;
        let ok = self.parse_type().is_ok()
            && matches!(self.peek(), Tok::Ident(n) if !is_reserved(n))
            && matches!(self.peek_at(1), Tok::Punct("="));
        self.pos = save;
        ok
    }

    fn parse_using_decl(&mut self) -> Result<Node, String> {
        let ty = self.parse_type()?;
        let name = self.expect_ident()?;
        self.expect_punct("=")?;
        let init = Some(Box::new(self.parse_expr()?));
        Ok(Node::VariableDecl { ty, name, init })
    }

    fn parse_namespace(&mut self) -> Result<Node, String> {
        self.expect_word("namespace")?;
        let mut name = self.expect_ident()?;
        while self.eat_punct(".") {
            name.push('.');
            name.push_str(&self.expect_ident()?);
        }
        // Block-scoped or file-scoped
        if self.eat_punct(";") {
            let mut body = Vec::new();
            while !self.at_eof() {
                body.push(self.parse_statement()?);
            }
            return Ok(Node::Namespace { name, body });
        }
        self.expect_punct("{")?;
        let mut body = Vec::new();
        while !self.eat_punct("}") {
            if self.at_eof() {
                return self.fail("unterminated namespace");
            }
            body.push(self.parse_statement()?);
        }
        Ok(Node::Namespace { name, body })
    }

    fn parse_enum(&mut self) -> Result<Node, String> {
        self.expect_word("enum")?;
        let name = self.expect_ident()?;
        self.expect_punct("{")?;
        let mut members = Vec::new();
        while !self.eat_punct("}") {
            let member = self.expect_ident()?;
            let value = if self.eat_punct("=") {
                let negative = self.eat_punct("-");
                match self.bump() {
                    Tok::Int { value, .. } => {
                        let v = value as i64;
                        Some(if negative { -v } else { v })
                    }
                    _ => return self.fail("enum values must be integer literals"),
                }
            } else {
                None
            };
            members.push((member, value));
            if !self.eat_punct(",") && !self.at_punct("}") {
                return self.fail("expected ',' or '}'");
            }
        }
        Ok(Node::EnumDecl { name, members })
    }

    fn parse_interface(&mut self) -> Result<Node, String> {
        self.expect_word("interface")?;
        let name = self.expect_ident()?;
        self.expect_punct("{")?;
        let mut members = Vec::new();
        while !self.eat_punct("}") {
            // Member signatures: Type Name(params);
            let _ty = self.parse_type()?;
            let member = self.expect_ident()?;
            self.expect_punct("(")?;
            let mut depth = 1;
            while depth > 0 {
                match self.bump() {
                    Tok::Punct("(") => depth += 1,
                    Tok::Punct(")") => depth -= 1,
                    Tok::Eof => return self.fail("unterminated interface member"),
                    _ => {}
                }
            }
            self.expect_punct(";")?;
            members.push(member);
        }
        Ok(Node::InterfaceDecl { name, members })
    }

    fn parse_type_decl(&mut self, is_class: bool) -> Result<Node, String> {
        self.bump(); // struct / class
        let name = self.expect_ident()?;
        let mut implements = Vec::new();
        if self.eat_punct(":") {
            loop {
                implements.push(self.expect_ident()?);
                if !self.eat_punct(",") {
                    break;
                }
            }
        }
        self.expect_punct("{")?;
        let mut fields = Vec::new();
        let mut ctors = Vec::new();
        let mut methods = Vec::new();
        while !self.eat_punct("}") {
            if self.at_eof() {
                return self.fail("unterminated type declaration");
            }
            // Constructor: Name ( … )
            if self.at_word(&name) && matches!(self.peek_at(1), Tok::Punct("(")) {
                self.bump();
                let func = self.parse_function_tail(name.clone(), TypeRef::Var, Vec::new())?;
                ctors.push(Rc::new(func));
                continue;
            }
            let mut is_public = false;
            loop {
                if self.eat_word("public") {
                    is_public = true;
                } else if self.eat_word("private") || self.eat_word("static") {
                } else {
                    break;
                }
            }
            let ty = self.parse_type()?;
            let member = self.expect_ident()?;
            if self.at_punct("(") {
                let mut func = self.parse_function_tail(member, ty, Vec::new())?;
                func.is_public = is_public;
                methods.push(Rc::new(func));
            } else {
                let init = if self.eat_punct("=") {
                    Some(self.parse_expr()?)
                } else {
                    None
                };
                self.expect_punct(";")?;
                fields.push((ty, member, init));
            }
        }
        let decl = Rc::new(TypeDecl {
            name,
            is_class,
            fields,
            ctors,
            methods,
            implements,
        });
        Ok(if is_class {
            Node::ClassDecl(decl)
        } else {
            Node::StructDecl(decl)
        })
    }

    fn parse_attributes(&mut self) -> Result<Vec<Attribute>, String> {
        let mut attributes = Vec::new();
        while self.at_punct("[") {
            self.bump();
            loop {
                let name = self.expect_ident()?;
                let mut args = Vec::new();
                if self.eat_punct("(") {
                    while !self.eat_punct(")") {
                        args.push(self.parse_const_literal()?);
                        if !self.eat_punct(",") && !self.at_punct(")") {
                            return self.fail("expected ',' or ')'");
                        }
                    }
                }
                attributes.push(Attribute { name, args });
                if !self.eat_punct(",") {
                    break;
                }
            }
            self.expect_punct("]")?;
        }
        Ok(attributes)
    }

    fn parse_const_literal(&mut self) -> Result<Const, String> {
        let negative = self.eat_punct("-");
        let c = match self.bump() {
            Tok::Int { value, suffix } => int_const(value, suffix, negative)?,
            Tok::Float { value, single } => {
                let v = if negative { -value } else { value };
                if single {
                    Const::Float(v as f32)
                } else {
                    Const::Double(v)
                }
            }
            Tok::DecimalLit(text) => {
                let d = Dec::parse(&text).map_err(|e| e.to_string())?;
                Const::Decimal(if negative { d.neg() } else { d })
            }
            Tok::Str(s) if !negative => Const::Str(s),
            Tok::Char(c) if !negative => Const::Char(c),
            Tok::Ident(w) if !negative && w == "true" => Const::Bool(true),
            Tok::Ident(w) if !negative && w == "false" => Const::Bool(false),
            Tok::Ident(w) if !negative && w == "null" => Const::Null,
            _ => return self.fail("expected a constant"),
        };
        Ok(c)
    }

    fn parse_function_decl(&mut self, attributes: Vec<Attribute>) -> Result<Node, String> {
        let mut is_public = false;
        loop {
            if self.eat_word("public") {
                is_public = true;
            } else if self.eat_word("static") || self.eat_word("private") {
            } else {
                break;
            }
        }
        let return_type = if self.eat_word("void") {
            TypeRef::Var
        } else {
            self.parse_type()?
        };
        let name = self.expect_ident()?;
        let mut func = self.parse_function_tail(name, return_type, attributes)?;
        func.is_public = is_public;
        Ok(Node::FunctionDecl(Rc::new(func)))
    }

    /// Parse `<T…>? ( params ) where-clauses ( { body } | => expr ; )`.
    fn parse_function_tail(
        &mut self,
        name: String,
        return_type: TypeRef,
        attributes: Vec<Attribute>,
    ) -> Result<FuncDecl, String> {
        let mut generics = Vec::new();
        if self.eat_punct("<") {
            loop {
                generics.push(GenericParam {
                    name: self.expect_ident()?,
                    constraints: Vec::new(),
                });
                if self.eat_punct(",") {
                    continue;
                }
                self.expect_punct(">")?;
                break;
            }
        }
        self.expect_punct("(")?;
        let mut params = Vec::new();
        let mut params_index = -1i32;
        while !self.eat_punct(")") {
            let is_params = self.eat_word("params");
            let ty = self.parse_type()?;
            let pname = self.expect_ident()?;
            let default = if self.eat_punct("=") {
                Some(self.parse_expr()?)
            } else {
                None
            };
            if is_params {
                if params_index >= 0 {
                    return self.fail("only one params parameter is allowed");
                }
                if !matches!(ty, TypeRef::Array(_)) {
                    return self.fail("params parameter must be an array type");
                }
                params_index = params.len() as i32;
            }
            params.push(Param { name: pname, ty, default, is_params });
            if !self.eat_punct(",") && !self.at_punct(")") {
                return self.fail("expected ',' or ')'");
            }
        }
        if params_index >= 0 && params_index as usize != params.len() - 1 {
            return self.fail("params parameter must be last");
        }
        while self.eat_word("where") {
            let target = self.expect_ident()?;
            self.expect_punct(":")?;
            let mut constraints = vec![self.expect_ident()?];
            while self.eat_punct(",") {
                constraints.push(self.expect_ident()?);
            }
            match generics.iter_mut().find(|g| g.name == target) {
                Some(g) => g.constraints = constraints,
                None => return self.fail(&format!("no generic parameter '{target}'")),
            }
        }
        let body = if self.eat_punct("=>") {
            let expr = self.parse_expr()?;
            self.expect_punct(";")?;
            Rc::new(Node::StatementList(vec![Node::Return(Some(Box::new(expr)))]))
        } else {
            let Node::Block(items) = self.parse_block()? else {
                unreachable!()
            };
            Rc::new(Node::StatementList(items))
        };
        Ok(FuncDecl {
            name,
            return_type,
            params,
            body,
            attributes,
            is_public: false,
            generics,
            params_index,
        })
    }

    // ---- patterns ----

    fn parse_pattern(&mut self) -> Result<Pattern, String> {
        let mut left = self.parse_pattern_and()?;
        while self.eat_word("or") {
            let right = self.parse_pattern_and()?;
            left = Pattern::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_pattern_and(&mut self) -> Result<Pattern, String> {
        let mut left = self.parse_pattern_unary()?;
        while self.eat_word("and") {
            let right = self.parse_pattern_unary()?;
            left = Pattern::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_pattern_unary(&mut self) -> Result<Pattern, String> {
        if self.eat_word("not") {
            return Ok(Pattern::Not(Box::new(self.parse_pattern_unary()?)));
        }
        for (p, op) in [
            (">=", BinKind::Ge),
            ("<=", BinKind::Le),
            (">", BinKind::Gt),
            ("<", BinKind::Lt),
        ] {
            if self.at_punct(p) {
                self.bump();
                let operand = self.parse_unary()?;
                return Ok(Pattern::Relational(op, Box::new(operand)));
            }
        }
        if self.at_word("_") {
            self.bump();
            return Ok(Pattern::Any);
        }
        if self.eat_word("var") {
            return Ok(Pattern::VarBind(self.expect_ident()?));
        }
        if self.eat_punct("(") {
            let inner = self.parse_pattern()?;
            self.expect_punct(")")?;
            return Ok(inner);
        }
        // A type pattern, optionally binding; else a constant expression
        if let Tok::Ident(word) = self.peek().clone()
            && !matches!(word.as_str(), "true" | "false" | "null")
            && !is_reserved(&word)
        {
            let save = self.pos;
            if let Ok(ty) = self.parse_type() {
                let is_type_name = matches!(
                    ty,
                    TypeRef::Kind(_) | TypeRef::Array(_) | TypeRef::Nullable(_) | TypeRef::Generic(..)
                );
                if let Tok::Ident(bind) = self.peek().clone()
                    && !is_reserved(&bind)
                {
                    self.bump();
                    return Ok(Pattern::Declaration(ty, bind));
                }
                if is_type_name {
                    return Ok(Pattern::Type(ty));
                }
            }
            self.pos = save;
        }
        let expr = self.parse_unary()?;
        Ok(Pattern::Constant(Box::new(expr)))
    }

    // ---- expressions ----

    pub(crate) fn parse_expr(&mut self) -> Result<Node, String> {
        self.parse_assignment()
    }

    fn parse_assignment(&mut self) -> Result<Node, String> {
        let target = self.parse_ternary()?;
        let op = match self.peek() {
            Tok::Punct("=") => None,
            Tok::Punct("+=") => Some(BinKind::Add),
            Tok::Punct("-=") => Some(BinKind::Sub),
            Tok::Punct("*=") => Some(BinKind::Mul),
            Tok::Punct("/=") => Some(BinKind::Div),
            Tok::Punct("%=") => Some(BinKind::Rem),
            Tok::Punct("&=") => Some(BinKind::BitAnd),
            Tok::Punct("|=") => Some(BinKind::BitOr),
            Tok::Punct("^=") => Some(BinKind::BitXor),
            Tok::Punct("<<=") => Some(BinKind::Shl),
            Tok::Punct(">>=") => Some(BinKind::Shr),
            Tok::Punct("??=") => Some(BinKind::NullCoalesce),
            _ => return Ok(target),
        };
        self.bump();
        let value = Box::new(self.parse_assignment()?);
        Ok(Node::Assign {
            target: Box::new(target),
            op,
            value,
        })
    }

    fn parse_ternary(&mut self) -> Result<Node, String> {
        let cond = self.parse_binary(0)?;
        if self.at_punct("?") && !matches!(self.peek_at(1), Tok::Punct(".") | Tok::Punct("[")) {
            self.bump();
            let then = Box::new(self.parse_expr()?);
            self.expect_punct(":")?;
            let other = Box::new(self.parse_expr()?);
            return Ok(Node::Conditional {
                cond: Box::new(cond),
                then,
                other,
            });
        }
        Ok(cond)
    }

    /// Precedence-climbing over the binary operator table.
    fn parse_binary(&mut self, min_level: usize) -> Result<Node, String> {
        // level: 0 ?? | 1 || | 2 && | 3 | | 4 ^ | 5 & | 6 == != |
        // 7 relational/is/as | 8 << >> | 9 + - | 10 * / %
        const TOP: usize = 11;
        if min_level >= TOP {
            return self.parse_unary();
        }
        let mut left = self.parse_binary(min_level + 1)?;
        loop {
            let op = match (min_level, self.peek()) {
                (0, Tok::Punct("??")) => BinKind::NullCoalesce,
                (1, Tok::Punct("||")) => BinKind::OrElse,
                (2, Tok::Punct("&&")) => BinKind::AndAlso,
                (3, Tok::Punct("|")) => BinKind::BitOr,
                (4, Tok::Punct("^")) => BinKind::BitXor,
                (5, Tok::Punct("&")) => BinKind::BitAnd,
                (6, Tok::Punct("==")) => BinKind::Eq,
                (6, Tok::Punct("!=")) => BinKind::Ne,
                (7, Tok::Punct("<")) => BinKind::Lt,
                (7, Tok::Punct("<=")) => BinKind::Le,
                (7, Tok::Punct(">")) => BinKind::Gt,
                (7, Tok::Punct(">=")) => BinKind::Ge,
                (7, Tok::Ident(w)) if w == "is" => {
                    self.bump();
                    let pattern = self.parse_pattern()?;
                    left = Node::Is {
                        expr: Box::new(left),
                        pattern,
                    };
                    continue;
                }
                (7, Tok::Ident(w)) if w == "as" => {
                    self.bump();
                    let target = self.parse_type()?;
                    left = Node::As {
                        expr: Box::new(left),
                        target,
                    };
                    continue;
                }
                (8, Tok::Punct("<<")) => BinKind::Shl,
                (8, Tok::Punct(">>")) => BinKind::Shr,
                (9, Tok::Punct("+")) => BinKind::Add,
                (9, Tok::Punct("-")) => BinKind::Sub,
                (10, Tok::Punct("*")) => BinKind::Mul,
                (10, Tok::Punct("/")) => BinKind::Div,
                (10, Tok::Punct("%")) => BinKind::Rem,
                _ => return Ok(left),
            };
            self.bump();
            let right = self.parse_binary(min_level + 1)?;
            left = Node::BinOp {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
    }

    fn parse_unary(&mut self) -> Result<Node, String> {
        let op = match self.peek() {
            Tok::Punct("-") => Some(UnaryKind::Neg),
            Tok::Punct("+") => Some(UnaryKind::Plus),
            Tok::Punct("!") => Some(UnaryKind::Not),
            Tok::Punct("~") => Some(UnaryKind::BitNot),
            Tok::Punct("++") => Some(UnaryKind::Inc),
            Tok::Punct("--") => Some(UnaryKind::Dec),
            Tok::Punct("*") => Some(UnaryKind::Deref),
            Tok::Punct("&") => Some(UnaryKind::AddressOf),
            _ => None,
        };
        if let Some(op) = op {
            self.bump();
            let operand = Box::new(self.parse_unary()?);
            return Ok(Node::UnaryOp {
                op,
                operand,
                postfix: false,
            });
        }
        if let Some(node) = self.try_parse_cast()? {
            return Ok(node);
        }
        self.parse_postfix()
    }

    /// `(Type) expr`: speculative, rolled back when it does not shape
    /// up as a cast.
    fn try_parse_cast(&mut self) -> Result<Option<Node>, String> {
        if !self.at_punct("(") {
            return Ok(None);
        }
        let save = self.pos;
        self.bump();
        let Ok(ty) = self.parse_type() else {
            self.pos = save;
            return Ok(None);
        };
        if !self.eat_punct(")") {
            self.pos = save;
            return Ok(None);
        }
        // A cast of a bare name is only believable for real type syntax
        let certain = !matches!(ty, TypeRef::Named(_)) || {
            matches!(self.peek(), Tok::Ident(w) if !is_reserved(w))
                || matches!(self.peek(), Tok::Str(_) | Tok::Char(_) | Tok::InterpStr(_))
        };
        let starts_operand = matches!(
            self.peek(),
            Tok::Ident(_)
                | Tok::Int { .. }
                | Tok::Float { .. }
                | Tok::DecimalLit(_)
                | Tok::Str(_)
                | Tok::Char(_)
                | Tok::InterpStr(_)
                | Tok::Punct("(")
                | Tok::Punct("!")
                | Tok::Punct("~")
        ) && !matches!(self.peek(), Tok::Ident(w) if matches!(w.as_str(), "is" | "as" | "switch"));
        if !certain || !starts_operand {
            self.pos = save;
            return Ok(None);
        }
        let expr = Box::new(self.parse_unary()?);
        Ok(Some(Node::Cast { target: ty, expr }))
    }

    fn parse_postfix(&mut self) -> Result<Node, String> {
        let mut node = self.parse_primary()?;
        loop {
            match self.peek().clone() {
                Tok::Punct("(") => {
                    let args = self.parse_args()?;
                    node = Node::Call {
                        callee: Box::new(node),
                        type_args: Vec::new(),
                        args,
                    };
                }
                Tok::Punct(".") => {
                    self.bump();
                    let name = self.expect_ident()?;
                    node = Node::Member {
                        target: Box::new(node),
                        name,
                    };
                }
                Tok::Punct("<") if matches!(node, Node::VariableRef { .. } | Node::Member { .. }) => {
                    // Explicit generic type arguments: Name<int>(…)
                    let save = self.pos;
                    self.bump();
                    let mut type_args = Vec::new();
                    let ok = loop {
                        match self.parse_type() {
                            Ok(t) => type_args.push(t),
                            Err(_) => break false,
                        }
                        if self.eat_punct(",") {
                            continue;
                        }
                        break self.eat_punct(">") && self.at_punct("(");
                    };
                    if !ok {
                        self.pos = save;
                        return Ok(node);
                    }
                    let args = self.parse_args()?;
                    node = Node::Call {
                        callee: Box::new(node),
                        type_args,
                        args,
                    };
                }
                Tok::Punct("[") => {
                    self.bump();
                    let index = self.parse_index_expr()?;
                    self.expect_punct("]")?;
                    node = Node::Index {
                        target: Box::new(node),
                        index,
                    };
                }
                Tok::Punct("++") => {
                    self.bump();
                    node = Node::UnaryOp {
                        op: UnaryKind::Inc,
                        operand: Box::new(node),
                        postfix: true,
                    };
                }
                Tok::Punct("--") => {
                    self.bump();
                    node = Node::UnaryOp {
                        op: UnaryKind::Dec,
                        operand: Box::new(node),
                        postfix: true,
                    };
                }
                Tok::Ident(w) if w == "switch" => {
                    self.bump();
                    node = self.parse_switch_expr(node)?;
                }
                _ => return Ok(node),
            }
        }
    }

    fn parse_index_expr(&mut self) -> Result<IndexExpr, String> {
        if self.eat_punct("^") {
            let index = Box::new(self.parse_expr()?);
            return Ok(IndexExpr::At { index, from_end: true });
        }
        if self.at_punct("..") {
            self.bump();
            let end = if self.at_punct("]") {
                None
            } else {
                Some(Box::new(self.parse_expr()?))
            };
            return Ok(IndexExpr::Range { start: None, end });
        }
        let first = self.parse_expr()?;
        if self.eat_punct("..") {
            let end = if self.at_punct("]") {
                None
            } else {
                Some(Box::new(self.parse_expr()?))
            };
            return Ok(IndexExpr::Range {
                start: Some(Box::new(first)),
                end,
            });
        }
        Ok(IndexExpr::At {
            index: Box::new(first),
            from_end: false,
        })
    }

    fn parse_switch_expr(&mut self, subject: Node) -> Result<Node, String> {
        self.expect_punct("{")?;
        let mut arms = Vec::new();
        while !self.eat_punct("}") {
            let pattern = self.parse_pattern()?;
            let guard = if self.eat_word("when") {
                Some(Box::new(self.parse_expr()?))
            } else {
                None
            };
            self.expect_punct("=>")?;
            let value = Box::new(self.parse_expr()?);
            arms.push(SwitchExprArm { pattern, guard, value });
            if !self.eat_punct(",") && !self.at_punct("}") {
                return self.fail("expected ',' or '}'");
            }
        }
        Ok(Node::SwitchExpr {
            subject: Box::new(subject),
            arms,
        })
    }

    fn parse_args(&mut self) -> Result<Vec<Arg>, String> {
        self.expect_punct("(")?;
        let mut args = Vec::new();
        while !self.eat_punct(")") {
            let name = if let Tok::Ident(n) = self.peek().clone()
                && !is_reserved(&n)
                && matches!(self.peek_at(1), Tok::Punct(":"))
            {
                self.bump();
                self.bump();
                Some(n)
            } else {
                None
            };
            let value = self.parse_expr()?;
            args.push(Arg { name, value });
            if !self.eat_punct(",") && !self.at_punct(")") {
                return self.fail("expected ',' or ')'");
            }
        }
        Ok(args)
    }

    fn parse_primary(&mut self) -> Result<Node, String> {
        // Lambdas: x => …  /  (a, b) => …
        if let Some(node) = self.try_parse_lambda()? {
            return Ok(node);
        }
        match self.bump() {
            Tok::Int { value, suffix } => Ok(Node::Literal(int_const(value, suffix, false)?)),
            Tok::Float { value, single } => Ok(Node::Literal(if single {
                Const::Float(value as f32)
            } else {
                Const::Double(value)
            })),
            Tok::DecimalLit(text) => Ok(Node::Literal(Const::Decimal(
                Dec::parse(&text).map_err(|e| e.to_string())?,
            ))),
            Tok::Str(s) => Ok(Node::Literal(Const::Str(s))),
            Tok::Char(c) => Ok(Node::Literal(Const::Char(c))),
            Tok::InterpStr(parts) => {
                let mut out = Vec::with_capacity(parts.len());
                for part in parts {
                    out.push(match part {
                        RawInterpPart::Text(t) => InterpPart::Text(t),
                        RawInterpPart::Expr { source, line, column } => InterpPart::Expr(
                            Box::new(parse_expression_source(&source, line, column)?),
                        ),
                    });
                }
                Ok(Node::InterpString(out))
            }
            Tok::Punct("(") => {
                let first = self.parse_tuple_element()?;
                if self.at_punct(",") {
                    let mut items = vec![first];
                    while self.eat_punct(",") {
                        items.push(self.parse_tuple_element()?);
                    }
                    self.expect_punct(")")?;
                    return Ok(Node::TupleLiteral(items));
                }
                self.expect_punct(")")?;
                Ok(first.1)
            }
            Tok::Punct("[") => {
                let mut items = Vec::new();
                while !self.eat_punct("]") {
                    items.push(self.parse_expr()?);
                    if !self.eat_punct(",") && !self.at_punct("]") {
                        return self.fail("expected ',' or ']'");
                    }
                }
                Ok(Node::CollectionExpr(items))
            }
            Tok::Ident(word) => match word.as_str() {
                "true" => Ok(Node::Literal(Const::Bool(true))),
                "false" => Ok(Node::Literal(Const::Bool(false))),
                "null" => Ok(Node::Literal(Const::Null)),
                "new" => self.parse_new(),
                _ => Ok(Node::var_ref(word)),
            },
            other => {
                self.pos = self.pos.saturating_sub(1);
                let _ = other;
                self.fail("expected an expression")
            }
        }
    }

    fn parse_tuple_element(&mut self) -> Result<(Option<String>, Node), String> {
        if let Tok::Ident(n) = self.peek().clone()
            && !is_reserved(&n)
            && matches!(self.peek_at(1), Tok::Punct(":"))
        {
            self.bump();
            self.bump();
            return Ok((Some(n), self.parse_expr()?));
        }
        Ok((None, self.parse_expr()?))
    }

    fn try_parse_lambda(&mut self) -> Result<Option<Node>, String> {
        let save = self.pos;
        let mut params = Vec::new();
        match self.peek().clone() {
            Tok::Ident(n) if !is_reserved(&n) && matches!(self.peek_at(1), Tok::Punct("=>")) => {
                self.bump();
                params.push(n);
            }
            Tok::Punct("(") => {
                self.bump();
                if !self.at_punct(")") {
                    loop {
                        match self.peek().clone() {
                            Tok::Ident(n) if !is_reserved(&n) => {
                                self.bump();
                                params.push(n);
                            }
                            _ => {
                                self.pos = save;
                                return Ok(None);
                            }
                        }
                        if self.eat_punct(",") {
                            continue;
                        }
                        break;
                    }
                }
                if !self.eat_punct(")") || !self.at_punct("=>") {
                    self.pos = save;
                    return Ok(None);
                }
            }
            _ => return Ok(None),
        }
        self.expect_punct("=>")?;
        let body = if self.at_punct("{") {
            let Node::Block(items) = self.parse_block()? else {
                unreachable!()
            };
            Rc::new(Node::StatementList(items))
        } else {
            let expr = self.parse_expr()?;
            Rc::new(Node::StatementList(vec![Node::Return(Some(Box::new(expr)))]))
        };
        Ok(Some(Node::Lambda { params, body }))
    }

    fn parse_new(&mut self) -> Result<Node, String> {
        // new[] { … }
        if self.at_punct("[") && matches!(self.peek_at(1), Tok::Punct("]")) {
            self.bump();
            self.bump();
            let init = self.parse_brace_items()?;
            return Ok(Node::NewArray {
                elem: TypeRef::Var,
                len: None,
                init,
            });
        }
        let name = self.expect_ident()?;
        // new Dictionary<K, V>(…) { {k, v}, … }
        if name == "Dictionary" && self.at_punct("<") {
            self.bump();
            let key = self.parse_type()?;
            self.expect_punct(",")?;
            let value = self.parse_type()?;
            self.expect_punct(">")?;
            if self.at_punct("(") {
                self.expect_punct("(")?;
                self.expect_punct(")")?;
            }
            let mut entries = Vec::new();
            if self.eat_punct("{") {
                while !self.eat_punct("}") {
                    self.expect_punct("{")?;
                    let k = self.parse_expr()?;
                    self.expect_punct(",")?;
                    let v = self.parse_expr()?;
                    self.expect_punct("}")?;
                    entries.push((k, v));
                    if !self.eat_punct(",") && !self.at_punct("}") {
                        return self.fail("expected ',' or '}'");
                    }
                }
            }
            return Ok(Node::NewDictionary { key, value, entries });
        }
        // Rebuild the element type for array forms
        let mut base = if let Some(kind) = Kind::from_name(&name) {
            TypeRef::Kind(kind)
        } else {
            TypeRef::Named(name.clone())
        };
        if self.at_punct("?") && !matches!(self.peek_at(1), Tok::Punct("[")) {
            self.bump();
            base = TypeRef::Nullable(Box::new(base));
        }
        if self.at_punct("[") {
            self.bump();
            if self.eat_punct("]") {
                // new T[] { … }
                let init = if self.at_punct("{") {
                    self.parse_brace_items()?
                } else {
                    Vec::new()
                };
                return Ok(Node::NewArray { elem: base, len: None, init });
            }
            let len = Box::new(self.parse_expr()?);
            self.expect_punct("]")?;
            let init = if self.at_punct("{") {
                self.parse_brace_items()?
            } else {
                Vec::new()
            };
            return Ok(Node::NewArray {
                elem: base,
                len: Some(len),
                init,
            });
        }
        // new Type(args)
        let args = if self.at_punct("(") {
            self.parse_args()?
        } else {
            Vec::new()
        };
        Ok(Node::NewStruct { type_name: name, args })
    }

    fn parse_brace_items(&mut self) -> Result<Vec<Node>, String> {
        self.expect_punct("{")?;
        let mut items = Vec::new();
        while !self.eat_punct("}") {
            items.push(self.parse_expr()?);
            if !self.eat_punct(",") && !self.at_punct("}") {
                return self.fail("expected ',' or '}'");
            }
        }
        Ok(items)
    }
}

fn int_const(value: u128, suffix: IntSuffix, negative: bool) -> Result<Const, String> {
    let signed = |v: u128| -> Result<i128, String> {
        let v = v as i128;
        Ok(if negative { -v } else { v })
    };
    match suffix {
        IntSuffix::U => {
            if negative {
                return Err("unsigned literal cannot be negative".into());
            }
            u32::try_from(value)
                .map(Const::Uint)
                .or_else(|_| u64::try_from(value).map(Const::Ulong))
                .map_err(|_| "integer literal too large".into())
        }
        IntSuffix::L => i64::try_from(signed(value)?)
            .map(Const::Long)
            .map_err(|_| "integer literal too large".into()),
        IntSuffix::Ul => {
            if negative {
                return Err("unsigned literal cannot be negative".into());
            }
            u64::try_from(value)
                .map(Const::Ulong)
                .map_err(|_| "integer literal too large".into())
        }
        IntSuffix::None => {
            let v = signed(value)?;
            if let Ok(small) = i32::try_from(v) {
                Ok(Const::Int(small))
            } else if let Ok(big) = i64::try_from(v) {
                Ok(Const::Long(big))
            } else if let Ok(u) = u64::try_from(v) {
                Ok(Const::Ulong(u))
            } else {
                Err("integer literal too large".into())
            }
        }
    }
}

/// Words that never serve as plain identifiers in expression position.
fn is_reserved(word: &str) -> bool {
    matches!(
        word,
        "if" | "else"
            | "while"
            | "do"
            | "for"
            | "foreach"
            | "in"
            | "switch"
            | "case"
            | "default"
            | "break"
            | "continue"
            | "goto"
            | "return"
            | "try"
            | "catch"
            | "finally"
            | "throw"
            | "new"
            | "using"
            | "namespace"
            | "struct"
            | "class"
            | "interface"
            | "enum"
            | "public"
            | "private"
            | "static"
            | "void"
            | "params"
            | "where"
            | "is"
            | "as"
            | "when"
            | "and"
            | "or"
            | "not"
            | "true"
            | "false"
            | "null"
            | "var"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &str) -> Node {
        parse_program(src).unwrap()
    }

    fn first(src: &str) -> Node {
        let Node::StatementList(mut items) = parse(src) else {
            panic!()
        };
        items.remove(0)
    }

    #[test]
    fn test_variable_decl() {
        let n = first("int x = 1 + 2;");
        let Node::VariableDecl { ty, name, init } = n else { panic!("{n:?}") };
        assert_eq!(ty, TypeRef::Kind(Kind::Int));
        assert_eq!(name, "x");
        assert!(matches!(*init.unwrap(), Node::BinOp { op: BinKind::Add, .. }));
    }

    #[test]
    fn test_precedence() {
        let n = first("x = 1 + 2 * 3;");
        let Node::Assign { value, .. } = n else { panic!("{n:?}") };
        let Node::BinOp { op: BinKind::Add, right, .. } = *value else { panic!() };
        assert!(matches!(*right, Node::BinOp { op: BinKind::Mul, .. }));
    }

    #[test]
    fn test_dotted_call() {
        let n = first(r#"Console.WriteLine("hi");"#);
        let Node::Call { callee, args, .. } = n else { panic!("{n:?}") };
        assert_eq!(callee.name_path(), Some(vec!["Console", "WriteLine"]));
        assert_eq!(args.len(), 1);
    }

    #[test]
    fn test_function_decl_with_params_tail() {
        let n = first("int Sum(int a, params int[] rest) { return a; }");
        let Node::FunctionDecl(f) = n else { panic!("{n:?}") };
        assert_eq!(f.name, "Sum");
        assert_eq!(f.params_index, 1);
        assert!(f.params[1].is_params);
    }

    #[test]
    fn test_attributes() {
        let n = first(r#"[Command("hi")] void Greet() { }"#);
        let Node::FunctionDecl(f) = n else { panic!("{n:?}") };
        assert_eq!(f.attributes.len(), 1);
        assert_eq!(f.attributes[0].name, "Command");
        assert_eq!(f.attributes[0].args, vec![Const::Str("hi".into())]);
    }

    #[test]
    fn test_generics_and_constraints() {
        let n = first("T Pick<T>(T a, T b) where T : numeric { return a; }");
        let Node::FunctionDecl(f) = n else { panic!("{n:?}") };
        assert_eq!(f.generics.len(), 1);
        assert_eq!(f.generics[0].constraints, vec!["numeric"]);
    }

    #[test]
    fn test_switch_statement_with_goto_case() {
        let n = first(
            "switch (x) { case 1: goto case 2; case 2: break; default: break; }",
        );
        let Node::Switch { sections, .. } = n else { panic!("{n:?}") };
        assert_eq!(sections.len(), 3);
        assert!(matches!(sections[0].body[0], Node::GotoCase(Some(Const::Int(2)))));
    }

    #[test]
    fn test_switch_expression() {
        let n = first("var y = x switch { 1 => \"one\", > 5 when x < 100 => \"big\", _ => \"other\" };");
        let Node::VariableDecl { init, .. } = n else { panic!("{n:?}") };
        let Node::SwitchExpr { arms, .. } = *init.unwrap() else { panic!() };
        assert_eq!(arms.len(), 3);
        assert!(arms[1].guard.is_some());
        assert!(matches!(arms[1].pattern, Pattern::Relational(BinKind::Gt, _)));
    }

    #[test]
    fn test_cast_vs_parens() {
        assert!(matches!(first("int y = (int)x;"), Node::VariableDecl { .. }));
        let n = first("y = (x) - 1;");
        let Node::Assign { value, .. } = n else { panic!("{n:?}") };
        assert!(matches!(*value, Node::BinOp { op: BinKind::Sub, .. }));
    }

    #[test]
    fn test_index_forms() {
        let n = first("y = a[^1];");
        let Node::Assign { value, .. } = n else { panic!("{n:?}") };
        let Node::Index { index, .. } = *value else { panic!() };
        assert!(matches!(index, IndexExpr::At { from_end: true, .. }));

        let n = first("y = a[1..3];");
        let Node::Assign { value, .. } = n else { panic!() };
        let Node::Index { index, .. } = *value else { panic!() };
        assert!(matches!(index, IndexExpr::Range { .. }));
    }

    #[test]
    fn test_tuple_and_deconstruct() {
        let n = first("var t = (x: 1, 2);");
        let Node::VariableDecl { init, .. } = n else { panic!("{n:?}") };
        let Node::TupleLiteral(items) = *init.unwrap() else { panic!() };
        assert_eq!(items[0].0.as_deref(), Some("x"));

        let n = first("var (a, b) = t;");
        assert!(matches!(n, Node::Deconstruct { declare: true, .. }));
        let n = first("(a, b) = t;");
        assert!(matches!(n, Node::Deconstruct { declare: false, .. }));
    }

    #[test]
    fn test_struct_decl() {
        let n = first("struct P { int x; string s = \"d\"; P(int x) { this.x = x; } int Mag() { return x; } }");
        let Node::StructDecl(d) = n else { panic!("{n:?}") };
        assert_eq!(d.fields.len(), 2);
        assert_eq!(d.ctors.len(), 1);
        assert_eq!(d.methods.len(), 1);
        assert!(!d.is_class);
    }

    #[test]
    fn test_enum_decl() {
        let n = first("enum Color { Red, Green = 5, Blue }");
        let Node::EnumDecl { members, .. } = n else { panic!("{n:?}") };
        assert_eq!(members[1], ("Green".into(), Some(5)));
    }

    #[test]
    fn test_lambda() {
        let n = first("var f = x => x + 1;");
        let Node::VariableDecl { init, .. } = n else { panic!("{n:?}") };
        let Node::Lambda { params, .. } = *init.unwrap() else { panic!() };
        assert_eq!(params, vec!["x"]);

        let n = first("var g = (a, b) => a;");
        let Node::VariableDecl { init, .. } = n else { panic!() };
        assert!(matches!(*init.unwrap(), Node::Lambda { .. }));
    }

    #[test]
    fn test_using_forms() {
        assert!(matches!(first("using System.Text;"), Node::UsingImport(n) if n == "System.Text"));
        assert!(matches!(
            first("using (var r = Open()) { }"),
            Node::UsingScoped { body: Some(_), .. }
        ));
        assert!(matches!(
            first("using var r = Open();"),
            Node::UsingScoped { body: None, .. }
        ));
    }

    #[test]
    fn test_try_catch_finally() {
        let n = first("try { } catch (Overflow e) { } catch { } finally { }");
        let Node::Try { catches, finally, .. } = n else { panic!("{n:?}") };
        assert_eq!(catches.len(), 2);
        assert_eq!(catches[0].filter.as_deref(), Some("Overflow"));
        assert_eq!(catches[0].binding.as_deref(), Some("e"));
        assert!(finally.is_some());
    }

    #[test]
    fn test_new_forms() {
        assert!(matches!(first("var a = new int[3];"), Node::VariableDecl { .. }));
        let n = first("var a = new[] { 1, 2 };");
        let Node::VariableDecl { init, .. } = n else { panic!() };
        assert!(matches!(*init.unwrap(), Node::NewArray { len: None, .. }));
        let n = first("var d = new Dictionary<string, int> { {\"a\", 1} };");
        let Node::VariableDecl { init, .. } = n else { panic!() };
        let Node::NewDictionary { entries, .. } = *init.unwrap() else { panic!() };
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_interp_string() {
        let n = first(r#"Console.WriteLine($"n={1 + 2}");"#);
        let Node::Call { args, .. } = n else { panic!("{n:?}") };
        let Node::InterpString(parts) = &args[0].value else { panic!() };
        assert_eq!(parts.len(), 2);
    }

    #[test]
    fn test_namespace_and_import() {
        let n = first("namespace App.Util { int Helper() { return 1; } }");
        let Node::Namespace { name, body } = n else { panic!("{n:?}") };
        assert_eq!(name, "App.Util");
        assert_eq!(body.len(), 1);
    }

    #[test]
    fn test_labels_and_goto() {
        let prog = parse("start: x = x + 1; goto start;");
        let Node::StatementList(items) = prog else { panic!() };
        assert!(matches!(&items[0], Node::Label(l) if l == "start"));
        assert!(matches!(&items[2], Node::Goto(l) if l == "start"));
    }

    #[test]
    fn test_parse_errors_carry_position() {
        let e = parse_program("int x = ;").unwrap_err();
        assert!(e.contains("parse error at 1:"), "{e}");
    }
}
