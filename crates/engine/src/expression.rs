//! Arithmetic and condition evaluation for `set`, `if` and `while` nodes.
//!
//! Both evaluators run after template substitution and never fail: an expression
//! that is not arithmetic is stored verbatim, and a condition without a recognized
//! operator is false.

use std::cmp::Ordering;

/// Comparison operators in matching priority. Longer operators come first so that
/// `<=` is never read as `<`.
const CONDITION_OPERATORS: [ConditionOperator; 7] = [
    ConditionOperator::Equal,
    ConditionOperator::NotEqual,
    ConditionOperator::LessOrEqual,
    ConditionOperator::GreaterOrEqual,
    ConditionOperator::Contains,
    ConditionOperator::Less,
    ConditionOperator::Greater,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionOperator {
    Equal,
    NotEqual,
    LessOrEqual,
    GreaterOrEqual,
    Contains,
    Less,
    Greater,
}

impl ConditionOperator {
    pub fn symbol(&self) -> &'static str {
        match self {
            ConditionOperator::Equal => "==",
            ConditionOperator::NotEqual => "!=",
            ConditionOperator::LessOrEqual => "<=",
            ConditionOperator::GreaterOrEqual => ">=",
            ConditionOperator::Contains => "contains",
            ConditionOperator::Less => "<",
            ConditionOperator::Greater => ">",
        }
    }
}

/// A condition split into its operands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition<'a> {
    pub left: &'a str,
    pub operator: ConditionOperator,
    pub right: &'a str,
}

/// Splits a resolved condition at the first operator occurrence.
pub fn split_condition(expression: &str) -> Option<Condition<'_>> {
    for (index, _) in expression.char_indices() {
        let rest = &expression[index..];
        if let Some(operator) = CONDITION_OPERATORS.iter().find(|operator| rest.starts_with(operator.symbol())) {
            let symbol_length = operator.symbol().len();
            return Some(Condition {
                left: strip_quotes(expression[..index].trim()),
                operator: *operator,
                right: strip_quotes(expression[index + symbol_length..].trim()),
            });
        }
    }
    None
}

/// Evaluates an already template-resolved condition.
pub fn evaluate_condition(expression: &str) -> bool {
    let Some(condition) = split_condition(expression) else {
        return false;
    };

    let expected = match condition.operator {
        ConditionOperator::Contains => return condition.left.contains(condition.right),
        ConditionOperator::Equal => [Ordering::Equal].as_slice(),
        ConditionOperator::NotEqual => [Ordering::Less, Ordering::Greater].as_slice(),
        ConditionOperator::LessOrEqual => [Ordering::Less, Ordering::Equal].as_slice(),
        ConditionOperator::GreaterOrEqual => [Ordering::Greater, Ordering::Equal].as_slice(),
        ConditionOperator::Less => [Ordering::Less].as_slice(),
        ConditionOperator::Greater => [Ordering::Greater].as_slice(),
    };

    let ordering = match (parse_number(condition.left), parse_number(condition.right)) {
        (Some(left), Some(right)) => match left.partial_cmp(&right) {
            Some(ordering) => ordering,
            None => return false,
        },
        _ => condition.left.cmp(condition.right),
    };

    expected.contains(&ordering)
}

/// Evaluates a `set` value: arithmetic when possible, otherwise the text itself.
pub fn evaluate_assignment(resolved: &str) -> String {
    evaluate_arithmetic(resolved)
        .and_then(format_number)
        .unwrap_or_else(|| resolved.to_string())
}

/// Evaluates `term (op term)+` strictly left to right.
///
/// Returns `None` when the text is not such a chain, when it has no operator, or when
/// it divides (or takes a modulo) by zero.
pub fn evaluate_arithmetic(text: &str) -> Option<f64> {
    let mut scanner = ArithmeticScanner::new(text);
    let mut accumulator = scanner.number()?;
    let mut saw_operator = false;

    while let Some(operator) = scanner.operator()? {
        let operand = scanner.number()?;
        saw_operator = true;
        accumulator = match operator {
            '+' => accumulator + operand,
            '-' => accumulator - operand,
            '*' => accumulator * operand,
            '/' if operand == 0.0 => return None,
            '/' => accumulator / operand,
            '%' if operand == 0.0 => return None,
            '%' => accumulator % operand,
            _ => return None,
        };
    }

    saw_operator.then_some(accumulator)
}

/// Formats a numeric result; integral values print without a decimal point.
pub fn format_number(value: f64) -> Option<String> {
    if !value.is_finite() {
        return None;
    }
    if value.fract() == 0.0 && value.abs() < 1e15 {
        return Some(format!("{}", value as i64));
    }
    Some(value.to_string())
}

fn parse_number(text: &str) -> Option<f64> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|value| value.is_finite())
}

fn strip_quotes(text: &str) -> &str {
    for quote in ['"', '\''] {
        if text.len() >= 2 && text.starts_with(quote) && text.ends_with(quote) {
            return &text[1..text.len() - 1];
        }
    }
    text
}

struct ArithmeticScanner<'a> {
    text: &'a str,
    position: usize,
}

impl<'a> ArithmeticScanner<'a> {
    fn new(text: &'a str) -> Self {
        Self { text, position: 0 }
    }

    fn skip_whitespace(&mut self) {
        let rest = &self.text[self.position..];
        self.position += rest.len() - rest.trim_start().len();
    }

    fn peek(&self) -> Option<char> {
        self.text[self.position..].chars().next()
    }

    /// Reads a signed decimal number.
    fn number(&mut self) -> Option<f64> {
        self.skip_whitespace();
        let start = self.position;
        if matches!(self.peek(), Some('+' | '-')) {
            self.position += 1;
        }
        let digits_start = self.position;
        let mut seen_dot = false;
        while let Some(character) = self.peek() {
            match character {
                '0'..='9' => self.position += 1,
                '.' if !seen_dot => {
                    seen_dot = true;
                    self.position += 1;
                }
                _ => break,
            }
        }
        let digits = &self.text[digits_start..self.position];
        if !digits.bytes().any(|byte| byte.is_ascii_digit()) {
            return None;
        }
        self.text[start..self.position].parse::<f64>().ok()
    }

    /// Reads the next operator: `Some(None)` at end of input, `None` on anything else.
    fn operator(&mut self) -> Option<Option<char>> {
        self.skip_whitespace();
        match self.peek() {
            None => Some(None),
            Some(operator @ ('+' | '-' | '*' | '/' | '%')) => {
                self.position += 1;
                Some(Some(operator))
            }
            Some(_) => None,
        }
    }
}
