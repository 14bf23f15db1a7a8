use axum::http::StatusCode;
use serde::Deserialize;
use std::fmt;

/// A test on the HTTP status of a produced response.
///
/// Written in configuration as a number (`500`) or a string: a comma list
/// (`"404,410"`), an inclusive range (`"400-499"`), a class (`"4xx"`),
/// `"non-2xx"` or `"any"`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "StatusPredicateRepr")]
pub enum StatusPredicate {
    Exact(Vec<u16>),
    Range(u16, u16),
    Class(u16),
    NonSuccess,
    Any,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StatusPredicateRepr {
    Code(u16),
    Text(String),
}

impl StatusPredicate {
    pub fn matches(&self, status: StatusCode) -> bool {
        let code = status.as_u16();
        match self {
            StatusPredicate::Exact(codes) => codes.contains(&code),
            StatusPredicate::Range(low, high) => (*low..=*high).contains(&code),
            StatusPredicate::Class(class) => code / 100 == *class,
            StatusPredicate::NonSuccess => !status.is_success(),
            StatusPredicate::Any => true,
        }
    }
}

fn parse_code(s: &str) -> Result<u16, String> {
    let code: u16 = s
        .trim()
        .parse()
        .map_err(|_| format!("Invalid status code: {}", s))?;
    if !(100..=599).contains(&code) {
        return Err(format!("Status code out of range: {}", code));
    }
    Ok(code)
}

impl std::str::FromStr for StatusPredicate {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();

        match s.as_str() {
            "any" | "*" => return Ok(StatusPredicate::Any),
            "non-2xx" => return Ok(StatusPredicate::NonSuccess),
            _ => {}
        }

        if let Some(class) = s.strip_suffix("xx") {
            return match class.parse::<u16>() {
                Ok(c @ 1..=5) => Ok(StatusPredicate::Class(c)),
                _ => Err(format!("Invalid status class: {}", s)),
            };
        }

        if let Some((low, high)) = s.split_once('-') {
            let (low, high) = (parse_code(low)?, parse_code(high)?);
            if low > high {
                return Err(format!("Empty status range: {}", s));
            }
            return Ok(StatusPredicate::Range(low, high));
        }

        let codes = s
            .split(',')
            .map(parse_code)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(StatusPredicate::Exact(codes))
    }
}

impl TryFrom<StatusPredicateRepr> for StatusPredicate {
    type Error = String;

    fn try_from(repr: StatusPredicateRepr) -> Result<Self, Self::Error> {
        match repr {
            StatusPredicateRepr::Code(code) => Ok(StatusPredicate::Exact(vec![parse_code(
                &code.to_string(),
            )?])),
            StatusPredicateRepr::Text(text) => text.parse(),
        }
    }
}

impl fmt::Display for StatusPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusPredicate::Exact(codes) => {
                let codes: Vec<String> = codes.iter().map(u16::to_string).collect();
                write!(f, "{}", codes.join(","))
            }
            StatusPredicate::Range(low, high) => write!(f, "{}-{}", low, high),
            StatusPredicate::Class(class) => write!(f, "{}xx", class),
            StatusPredicate::NonSuccess => f.write_str("non-2xx"),
            StatusPredicate::Any => f.write_str("any"),
        }
    }
}
