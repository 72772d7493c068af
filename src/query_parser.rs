//! Nom parser for query documents.
//!
//! Covers the executable subset the mirror sees in practice: one operation
//! (anonymous shorthand or `query`/`mutation`/`subscription` with variable
//! definitions), aliases, arguments and nested selection sets. Fragments and
//! directives are not supported and fail to parse.

use nom::{
    branch::alt,
    bytes::complete::{tag, take_while},
    character::complete::{char, digit1, multispace1, not_line_ending, one_of, satisfy},
    combinator::{all_consuming, map, map_res, opt, recognize, value},
    error::{Error, ErrorKind},
    multi::{many0, many1},
    sequence::{delimited, pair, preceded, terminated, tuple},
    IResult,
};

use crate::error::MirrorError;
use crate::selection::{Field, InputValue, Operation, OperationKind, VariableDefinition};

/// Parse a query document into an [`Operation`].
///
/// # Examples
///
/// ```
/// use dex_state_mirror::query_parser::parse_query;
///
/// let op = parse_query("{ pairs { address info { reserve0 } } }").unwrap();
/// assert_eq!(op.selections[0].name, "pairs");
/// ```
pub fn parse_query(document: &str) -> Result<Operation, MirrorError> {
    match all_consuming(delimited(ws, operation, ws))(document) {
        Ok((_, op)) => Ok(op),
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => {
            let offset = document.len() - e.input.len();
            let snippet: String = e.input.chars().take(24).collect();
            Err(MirrorError::InvalidQuery(format!(
                "unexpected input at offset {}: {:?}",
                offset, snippet
            )))
        }
        Err(nom::Err::Incomplete(_)) => {
            Err(MirrorError::InvalidQuery("incomplete document".to_string()))
        }
    }
}

// Whitespace, commas and comments are insignificant between tokens.
fn ws(input: &str) -> IResult<&str, ()> {
    value(
        (),
        many0(alt((
            multispace1,
            tag(","),
            recognize(pair(char('#'), not_line_ending)),
        ))),
    )(input)
}

fn name(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        satisfy(|c| c.is_ascii_alphabetic() || c == '_'),
        take_while(|c: char| c.is_ascii_alphanumeric() || c == '_'),
    ))(input)
}

fn operation(input: &str) -> IResult<&str, Operation> {
    alt((named_operation, map(selection_set, Operation::new)))(input)
}

fn operation_kind(input: &str) -> IResult<&str, OperationKind> {
    alt((
        value(OperationKind::Query, tag("query")),
        value(OperationKind::Mutation, tag("mutation")),
        value(OperationKind::Subscription, tag("subscription")),
    ))(input)
}

fn named_operation(input: &str) -> IResult<&str, Operation> {
    let (input, kind) = operation_kind(input)?;
    let (input, _) = ws(input)?;
    let (input, op_name) = opt(name)(input)?;
    let (input, _) = ws(input)?;
    let (input, variable_definitions) = opt(variable_definitions)(input)?;
    let (input, _) = ws(input)?;
    let (input, selections) = selection_set(input)?;
    Ok((
        input,
        Operation {
            kind,
            name: op_name.map(str::to_string),
            variable_definitions: variable_definitions.unwrap_or_default(),
            selections,
        },
    ))
}

fn variable_definitions(input: &str) -> IResult<&str, Vec<VariableDefinition>> {
    delimited(
        pair(char('('), ws),
        many0(terminated(variable_definition, ws)),
        char(')'),
    )(input)
}

fn variable_definition(input: &str) -> IResult<&str, VariableDefinition> {
    let (input, var_name) = preceded(char('$'), name)(input)?;
    let (input, _) = tuple((ws, char(':'), ws))(input)?;
    let (input, type_name) = type_ref(input)?;
    let (input, _) = ws(input)?;
    let (input, default_value) = opt(preceded(pair(char('='), ws), input_value))(input)?;
    Ok((
        input,
        VariableDefinition {
            name: var_name.to_string(),
            type_name: type_name.to_string(),
            default_value,
        },
    ))
}

fn type_ref(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        alt((
            name,
            recognize(tuple((char('['), ws, type_ref, ws, char(']')))),
        )),
        opt(char('!')),
    ))(input)
}

fn selection_set(input: &str) -> IResult<&str, Vec<Field>> {
    delimited(pair(char('{'), ws), many1(terminated(field, ws)), char('}'))(input)
}

fn field(input: &str) -> IResult<&str, Field> {
    let (input, first) = name(input)?;
    let (input, _) = ws(input)?;
    let (input, aliased) = opt(preceded(pair(char(':'), ws), name))(input)?;
    let (input, _) = ws(input)?;
    let (input, arguments) = opt(arguments)(input)?;
    let (input, _) = ws(input)?;
    let (input, subfields) = opt(selection_set)(input)?;

    let (alias, field_name) = match aliased {
        Some(real) => (Some(first.to_string()), real.to_string()),
        None => (None, first.to_string()),
    };
    Ok((
        input,
        Field {
            alias,
            name: field_name,
            arguments: arguments.unwrap_or_default(),
            subfields: subfields.unwrap_or_default(),
        },
    ))
}

fn arguments(input: &str) -> IResult<&str, Vec<(String, InputValue)>> {
    delimited(
        pair(char('('), ws),
        many0(terminated(named_value, ws)),
        char(')'),
    )(input)
}

fn named_value(input: &str) -> IResult<&str, (String, InputValue)> {
    let (input, key) = name(input)?;
    let (input, _) = tuple((ws, char(':'), ws))(input)?;
    let (input, value) = input_value(input)?;
    Ok((input, (key.to_string(), value)))
}

fn input_value(input: &str) -> IResult<&str, InputValue> {
    alt((
        map(preceded(char('$'), name), |v| InputValue::Variable(v.to_string())),
        map(string_literal, InputValue::String),
        number,
        map(
            delimited(
                pair(char('['), ws),
                many0(terminated(input_value, ws)),
                char(']'),
            ),
            InputValue::List,
        ),
        map(
            delimited(
                pair(char('{'), ws),
                many0(terminated(named_value, ws)),
                char('}'),
            ),
            InputValue::Object,
        ),
        map(name, |word| match word {
            "true" => InputValue::Bool(true),
            "false" => InputValue::Bool(false),
            "null" => InputValue::Null,
            other => InputValue::Enum(other.to_string()),
        }),
    ))(input)
}

fn number(input: &str) -> IResult<&str, InputValue> {
    map_res(
        recognize(tuple((
            opt(char('-')),
            digit1,
            opt(pair(char('.'), digit1)),
            opt(tuple((one_of("eE"), opt(one_of("+-")), digit1))),
        ))),
        |text: &str| {
            if text.contains(|c: char| matches!(c, '.' | 'e' | 'E')) {
                text.parse::<f64>().map(InputValue::Float).map_err(|_| ())
            } else {
                match text.parse::<i64>() {
                    Ok(i) => Ok(InputValue::Int(i)),
                    Err(_) => text.parse::<f64>().map(InputValue::Float).map_err(|_| ()),
                }
            }
        },
    )(input)
}

fn string_literal(input: &str) -> IResult<&str, String> {
    let (mut rest, _) = char('"')(input)?;
    let mut out = String::new();
    loop {
        let mut chars = rest.chars();
        match chars.next() {
            None | Some('\n') => return Err(nom::Err::Error(Error::new(rest, ErrorKind::Char))),
            Some('"') => return Ok((&rest[1..], out)),
            Some('\\') => {
                let escaped = chars
                    .next()
                    .ok_or_else(|| nom::Err::Error(Error::new(rest, ErrorKind::Escaped)))?;
                let consumed = match escaped {
                    '"' | '\\' | '/' => {
                        out.push(escaped);
                        2
                    }
                    'b' => {
                        out.push('\u{8}');
                        2
                    }
                    'f' => {
                        out.push('\u{c}');
                        2
                    }
                    'n' => {
                        out.push('\n');
                        2
                    }
                    'r' => {
                        out.push('\r');
                        2
                    }
                    't' => {
                        out.push('\t');
                        2
                    }
                    'u' => {
                        let decoded = rest
                            .get(2..6)
                            .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                            .and_then(char::from_u32)
                            .ok_or_else(|| nom::Err::Error(Error::new(rest, ErrorKind::Escaped)))?;
                        out.push(decoded);
                        6
                    }
                    _ => return Err(nom::Err::Error(Error::new(rest, ErrorKind::Escaped))),
                };
                rest = &rest[consumed..];
            }
            Some(c) => {
                out.push(c);
                rest = &rest[c.len_utf8()..];
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shorthand_query() {
        let op = parse_query("{pairs{address info{reserve0 reserve1}}}").unwrap();
        assert_eq!(op.kind, OperationKind::Query);
        assert_eq!(op.selections.len(), 1);
        let pairs = &op.selections[0];
        assert_eq!(pairs.name, "pairs");
        assert_eq!(pairs.subfields[0].name, "address");
        let info = pairs.subfield("info").unwrap();
        assert_eq!(info.subfields.len(), 2);
        assert_eq!(info.subfields[1].name, "reserve1");
    }

    #[test]
    fn test_named_operation_with_variables_and_aliases() {
        let doc = r#"
            query Top($first: Int!, $ids: [String!] = ["A"]) {
                # comment
                top: filteredPairs(
                    pagination: { first: $first },
                    sorting: { sortField: TVL, sortOrder: DESC },
                    filters: { addresses: $ids, minLockedValueUSD: 1.5e3, issuedLpToken: true }
                ) {
                    edges { cursor node { address } }
                }
                tokens(limit: -1) { identifier }
            }
        "#;
        let op = parse_query(doc).unwrap();
        assert_eq!(op.name.as_deref(), Some("Top"));
        assert_eq!(op.variable_definitions.len(), 2);
        assert_eq!(op.variable_definitions[1].type_name, "[String!]");
        assert_eq!(
            op.variable_definitions[1].default_value,
            Some(InputValue::List(vec![InputValue::String("A".into())]))
        );

        let top = &op.selections[0];
        assert_eq!(top.alias.as_deref(), Some("top"));
        assert_eq!(top.name, "filteredPairs");
        assert_eq!(top.response_key(), "top");
        assert_eq!(
            top.arguments[1].1,
            InputValue::Object(vec![
                ("sortField".into(), InputValue::Enum("TVL".into())),
                ("sortOrder".into(), InputValue::Enum("DESC".into())),
            ])
        );
        match &top.arguments[2].1 {
            InputValue::Object(fields) => {
                assert_eq!(fields[1].1, InputValue::Float(1500.0));
                assert_eq!(fields[2].1, InputValue::Bool(true));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(op.selections[1].arguments[0].1, InputValue::Int(-1));
    }

    #[test]
    fn test_string_escapes() {
        let op = parse_query(r#"{ tokens(filters: {searchToken: "a\"bA\n"}) { identifier } }"#)
            .unwrap();
        match &op.selections[0].arguments[0].1 {
            InputValue::Object(fields) => {
                assert_eq!(fields[0].1, InputValue::String("a\"bA\n".to_string()))
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_rendered_operation_parses_back() {
        let doc = "query Q($n: Int) { a: pairs(offset: 1, limit: $n, state: [\"Active\"]) { address info { reserve0 } } }";
        let op = parse_query(doc).unwrap();
        let rendered = op.to_query_string();
        assert_eq!(parse_query(&rendered).unwrap(), op);
    }

    #[test]
    fn test_rejects_fragments_and_garbage() {
        assert!(matches!(
            parse_query("{ pairs { ...PairFields } }"),
            Err(MirrorError::InvalidQuery(_))
        ));
        assert!(parse_query("{ pairs { address }").is_err());
        assert!(parse_query("").is_err());
        assert!(parse_query("{ }").is_err());
    }

    #[test]
    fn test_mutation_kind() {
        let op = parse_query("mutation { swap(amount: \"1\") }").unwrap();
        assert_eq!(op.kind, OperationKind::Mutation);
        assert!(op.selections[0].is_leaf());
    }
}
