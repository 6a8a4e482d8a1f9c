//! The toy instruction set and the user-program parser.
//!
//! User programs arrive as a single `;`-separated string. Only the six
//! user-facing forms are accepted at intake; `SLEEP` and `FOR` exist solely
//! for the synthetic instruction generator.

use thiserror::Error;

/// Second operand of a `WRITE`: a literal or the name of a variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteSrc {
    Literal(u16),
    Var(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    Declare { var: String, value: u16 },
    Add { dst: String, a: String, b: String },
    Subtract { dst: String, a: String, b: String },
    Print { var: String },
    Write { addr: u64, src: WriteSrc },
    Read { var: String, addr: u64 },
    Sleep { ms: u64 },
    For { var: String, count: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProgramError {
    #[error("malformed instruction `{0}`")]
    Malformed(String),
}

/// Parse a `;`-separated program. Empty segments are skipped; any malformed
/// segment rejects the whole program.
pub fn parse_program(raw: &str) -> Result<Vec<Instruction>, ProgramError> {
    raw.split(';')
        .map(str::trim)
        .filter(|piece| !piece.is_empty())
        .map(parse_one)
        .collect()
}

fn parse_one(text: &str) -> Result<Instruction, ProgramError> {
    let malformed = || ProgramError::Malformed(text.to_string());

    // PRINT("Result: " + var) carries spaces inside the parentheses, so it
    // cannot go through the whitespace tokenizer below.
    if let Some(inner) = text
        .strip_prefix("PRINT(")
        .and_then(|rest| rest.strip_suffix(')'))
    {
        let var = inner
            .trim()
            .strip_prefix("\"Result: \"")
            .map(str::trim)
            .and_then(|rest| rest.strip_prefix('+'))
            .map(str::trim)
            .filter(|name| is_ident(name))
            .ok_or_else(malformed)?;
        return Ok(Instruction::Print {
            var: var.to_string(),
        });
    }

    let tokens: Vec<&str> = text.split_whitespace().collect();
    match tokens.as_slice() {
        ["DECLARE", var, value] if is_ident(var) => Ok(Instruction::Declare {
            var: (*var).to_string(),
            value: parse_u16_saturating(value).ok_or_else(malformed)?,
        }),
        ["ADD", dst, a, b] if is_ident(dst) && is_ident(a) && is_ident(b) => {
            Ok(Instruction::Add {
                dst: (*dst).to_string(),
                a: (*a).to_string(),
                b: (*b).to_string(),
            })
        }
        ["SUBTRACT", dst, a, b] if is_ident(dst) && is_ident(a) && is_ident(b) => {
            Ok(Instruction::Subtract {
                dst: (*dst).to_string(),
                a: (*a).to_string(),
                b: (*b).to_string(),
            })
        }
        ["WRITE", addr, token] => {
            let addr = parse_hex_addr(addr).ok_or_else(malformed)?;
            let src = if token.chars().next().is_some_and(|c| c.is_ascii_digit()) {
                WriteSrc::Literal(parse_u16_saturating(token).ok_or_else(malformed)?)
            } else if is_ident(token) {
                WriteSrc::Var((*token).to_string())
            } else {
                return Err(malformed());
            };
            Ok(Instruction::Write { addr, src })
        }
        ["READ", var, addr] if is_ident(var) => Ok(Instruction::Read {
            var: (*var).to_string(),
            addr: parse_hex_addr(addr).ok_or_else(malformed)?,
        }),
        _ => Err(malformed()),
    }
}

/// `[A-Za-z_][A-Za-z0-9_]*`
fn is_ident(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Parse a run of decimal digits, saturating at `u16::MAX`.
fn parse_u16_saturating(s: &str) -> Option<u16> {
    if s.is_empty() {
        return None;
    }
    let mut value: u32 = 0;
    for c in s.chars() {
        let digit = c.to_digit(10)?;
        value = (value * 10 + digit).min(u32::from(u16::MAX));
    }
    Some(value as u16)
}

/// Parse a `0x`-prefixed hexadecimal address.
fn parse_hex_addr(s: &str) -> Option<u64> {
    let digits = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X"))?;
    if digits.is_empty() {
        return None;
    }
    u64::from_str_radix(digits, 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_forms_parse() {
        let program =
            parse_program("DECLARE A 1; ADD B A A; PRINT(\"Result: \" + B)").unwrap();
        assert_eq!(
            program,
            vec![
                Instruction::Declare {
                    var: "A".into(),
                    value: 1
                },
                Instruction::Add {
                    dst: "B".into(),
                    a: "A".into(),
                    b: "A".into()
                },
                Instruction::Print { var: "B".into() },
            ]
        );
    }

    #[test]
    fn write_accepts_literal_and_variable() {
        assert_eq!(
            parse_one("WRITE 0x100 5").unwrap(),
            Instruction::Write {
                addr: 0x100,
                src: WriteSrc::Literal(5)
            }
        );
        assert_eq!(
            parse_one("WRITE 0xFF varA").unwrap(),
            Instruction::Write {
                addr: 0xFF,
                src: WriteSrc::Var("varA".into())
            }
        );
    }

    #[test]
    fn read_parses_hex_address() {
        assert_eq!(
            parse_one("READ out 0x1a0").unwrap(),
            Instruction::Read {
                var: "out".into(),
                addr: 0x1A0
            }
        );
    }

    #[test]
    fn declare_saturates_large_literals() {
        assert_eq!(
            parse_one("DECLARE big 99999999").unwrap(),
            Instruction::Declare {
                var: "big".into(),
                value: u16::MAX
            }
        );
    }

    #[test]
    fn empty_segments_are_skipped() {
        let program = parse_program("DECLARE A 1;; ; DECLARE B 2;").unwrap();
        assert_eq!(program.len(), 2);
    }

    #[test]
    fn malformed_programs_are_rejected() {
        for bad in [
            "DECLARE 1 A",
            "ADD a b",
            "WRITE 100 5",
            "WRITE 0x 5",
            "READ 0x100 v",
            "PRINT(\"Sum: \" + v)",
            "PRINT(\"Result: \" + 5)",
            "SLEEP 100",
            "FOR v 3",
            "JUMP 4",
        ] {
            assert!(
                parse_program(bad).is_err(),
                "`{bad}` should have been rejected"
            );
        }
    }

    #[test]
    fn one_bad_segment_rejects_the_whole_program() {
        assert_eq!(
            parse_program("DECLARE A 1; BOGUS; DECLARE B 2"),
            Err(ProgramError::Malformed("BOGUS".into()))
        );
    }
}
