pub const INVALID_RESULT: &str = "Invalid calculation result.";

/// Evaluate an arithmetic expression after stripping everything outside digits, operators,
/// parentheses and whitespace. Parse failures are reported as result text.
pub fn run(expression: &str) -> String {
    let sanitized: String = expression
        .chars()
        .filter(|c| c.is_ascii_digit() || "+-*/(). \t\n\r".contains(*c))
        .collect();

    if sanitized.trim().is_empty() {
        return INVALID_RESULT.to_string();
    }

    match Parser::new(&sanitized).evaluate() {
        Ok(value) if value.is_finite() => format!("{expression} = {}", format_number(value)),
        Ok(_) => INVALID_RESULT.to_string(),
        Err(msg) => format!("Calculation error: {msg}"),
    }
}

#[allow(clippy::cast_possible_truncation)]
fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        return format!("{}", value as i64);
    }
    format!("{value}")
}

/// Nested groups, signs and exponents deeper than this are rejected before they can exhaust
/// the stack.
const MAX_DEPTH: usize = 64;

/// Recursive descent over
/// `expr := term (('+'|'-') term)*`, `term := unary (('*'|'/') unary)*`,
/// `unary := ('+'|'-') unary | power`, `power := primary ('**' unary)?`,
/// `primary := number | '(' expr ')'`.
struct Parser<'a> {
    input: &'a [u8],
    pos: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input: input.as_bytes(),
            pos: 0,
            depth: 0,
        }
    }

    fn evaluate(mut self) -> Result<f64, String> {
        let value = self.expression()?;
        self.skip_whitespace();
        if let Some(c) = self.peek() {
            return Err(format!("Unexpected token '{}'", c as char));
        }
        Ok(value)
    }

    fn expression(&mut self) -> Result<f64, String> {
        let mut value = self.term()?;
        loop {
            match self.next_operator(b"+-") {
                Some(b'+') => value += self.term()?,
                Some(_) => value -= self.term()?,
                None => return Ok(value),
            }
        }
    }

    fn term(&mut self) -> Result<f64, String> {
        let mut value = self.unary()?;
        loop {
            match self.next_operator(b"*/") {
                Some(b'*') => value *= self.unary()?,
                Some(_) => value /= self.unary()?,
                None => return Ok(value),
            }
        }
    }

    fn unary(&mut self) -> Result<f64, String> {
        self.skip_whitespace();
        match self.peek() {
            Some(b'-') => {
                self.pos += 1;
                self.nested(|parser| parser.unary().map(|value| -value))
            }
            Some(b'+') => {
                self.pos += 1;
                self.nested(Self::unary)
            }
            _ => self.power(),
        }
    }

    /// Right-associative, so `2 ** 3 ** 2` is `2 ** 9`.
    fn power(&mut self) -> Result<f64, String> {
        let base = self.primary()?;
        self.skip_whitespace();
        if self.input.get(self.pos..).is_some_and(|rest| rest.starts_with(b"**")) {
            self.pos += 2;
            let exponent = self.nested(Self::unary)?;
            return Ok(base.powf(exponent));
        }
        Ok(base)
    }

    fn primary(&mut self) -> Result<f64, String> {
        self.skip_whitespace();
        match self.peek() {
            Some(b'(') => {
                self.pos += 1;
                let value = self.nested(Self::expression)?;
                self.skip_whitespace();
                if self.peek() != Some(b')') {
                    return Err("Missing closing parenthesis".to_string());
                }
                self.pos += 1;
                Ok(value)
            }
            Some(c) if c.is_ascii_digit() || c == b'.' => self.number(),
            Some(c) => Err(format!("Unexpected token '{}'", c as char)),
            None => Err("Unexpected end of input".to_string()),
        }
    }

    fn nested(
        &mut self,
        parse: impl FnOnce(&mut Self) -> Result<f64, String>,
    ) -> Result<f64, String> {
        if self.depth >= MAX_DEPTH {
            return Err("Expression nests too deeply".to_string());
        }
        self.depth += 1;
        let value = parse(self);
        self.depth -= 1;
        value
    }

    fn number(&mut self) -> Result<f64, String> {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_digit() || c == b'.') {
            self.pos += 1;
        }
        let literal = std::str::from_utf8(&self.input[start..self.pos])
            .map_err(|err| err.to_string())?;
        literal
            .parse::<f64>()
            .map_err(|_| format!("Invalid number '{literal}'"))
    }

    fn next_operator(&mut self, operators: &[u8]) -> Option<u8> {
        self.skip_whitespace();
        let c = self.peek().filter(|c| operators.contains(c))?;
        self.pos += 1;
        Some(c)
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }
}
