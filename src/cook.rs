//! The cook evaluator: `$…` programs inside generic data trees.
//!
//! This is a private module. Its public items are re-exported by the parent.
//!
//! Cooking walks a [`Data`] tree, typically one read from JSON, and
//! replaces every string whose first character is `$` with the result of
//! evaluating the rest of the string as a program. Programs run against a
//! stack; the words are described in [`cook`]. Results are not cooked
//! again, even if they are strings.
//!
//! Map entries are evaluated in alphabetical key order. When a program
//! references a sibling or ancestor key that has not been evaluated yet,
//! evaluation of the current key is aborted, the referenced key is
//! scheduled first, and the current key is retried afterwards. Mutual
//! references are reported as circular dependencies.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use num_bigint::BigInt;
use crate::error::Error;
use crate::instantiate::Data;
use crate::node::Definitions;

/// A host function callable from cook programs.
///
/// The function receives the stack, typically popping arguments off its
/// end and pushing results, and the location prefix to put in front of
/// error messages. The prefix ends in `": "` when non-empty.
pub type CookFn = dyn Fn(&mut Vec<Data>, &str) -> Result<(), Error>
    + Send + Sync;

/// A table of host functions for [`cook`], keyed by their program word.
pub type CookFunctions = HashMap<String, Arc<CookFn>>;

/// Cooks a data tree.
///
/// Valid program words are:
///
/// * `'literal'` pushes a string; a doubled quote inside the literal
///   stands for a single quote.
/// * `N.N.N…` with at least three integer components pushes an integer
///   list (an OBJECT IDENTIFIER initializer).
/// * a signed integer of arbitrary size pushes an integer.
/// * a name in `funcs` invokes the function on the stack.
/// * the name of a type in `defs` pops the stack top and pushes the
///   result of instantiating the type from it.
/// * the name of a value in `defs` pushes that value.
/// * any other name is looked up as a variable: first among the already
///   evaluated keys of the containing maps, innermost first, then in the
///   `vars` scopes, last first.
///
/// A program must leave exactly one element on the stack; that element
/// replaces the program string in the tree.
pub fn cook(
    defs: &Definitions,
    vars: &[HashMap<String, Data>],
    funcs: &CookFunctions,
    data: Data,
) -> Result<Data, Error> {
    let mut cooker = Cooker {
        defs, vars, funcs,
        scopes: Vec::new(),
        done: HashSet::new(),
    };
    let mut data = data;
    match cooker.cook_value(&mut data, "") {
        Ok(()) => Ok(data),
        Err(Abort::Fail(err)) => Err(err),
        Err(Abort::Reorder(word)) => {
            // A dependency on a key no scope knows; cannot be satisfied.
            Err(Error::cook("", format!(
                "Word is not a known function, variable, type or \
                 constant: {}",
                word
            )))
        }
    }
}


//------------ Cooker --------------------------------------------------------

/// Why evaluation of a subtree stopped early.
enum Abort {
    /// The named key must be evaluated before the current one.
    Reorder(String),

    /// A real error; propagates to the caller unchanged.
    Fail(Error),
}

impl From<Error> for Abort {
    fn from(err: Error) -> Self {
        Abort::Fail(err)
    }
}

/// The evaluation state of one map on the recursion path.
struct Scope {
    /// Values of keys that finished evaluating.
    values: HashMap<String, Data>,

    /// Keys that have not finished evaluating.
    pending: BTreeSet<String>,

    /// The key whose subtree is being evaluated right now.
    current: Option<String>,
}

struct Cooker<'a> {
    defs: &'a Definitions,
    vars: &'a [HashMap<String, Data>],
    funcs: &'a CookFunctions,
    scopes: Vec<Scope>,

    /// Paths of program strings that have been executed. Survives
    /// re-entry of aborted subtrees so no program runs twice.
    done: HashSet<String>,
}

impl<'a> Cooker<'a> {
    fn cook_value(
        &mut self, data: &mut Data, path: &str
    ) -> Result<(), Abort> {
        match data {
            Data::Map(_) => self.cook_map(data, path),
            Data::List(items) => {
                for (idx, item) in items.iter_mut().enumerate() {
                    let child_path = format!("{}[{:04}]", path, idx);
                    self.cook_value(item, &child_path)?;
                }
                Ok(())
            }
            Data::Str(program) => {
                if !program.starts_with('$') || self.done.contains(path) {
                    return Ok(())
                }
                let program = program[1..].to_string();
                let result = self.exec_program(&program, path)?;
                self.done.insert(path.to_string());
                *data = result;
                Ok(())
            }
            _ => Ok(())
        }
    }

    fn cook_map(
        &mut self, data: &mut Data, path: &str
    ) -> Result<(), Abort> {
        let map = match data {
            Data::Map(map) => map,
            _ => unreachable!(),
        };
        // BTreeMap iteration gives the alphabetical default order.
        let mut schedule: Vec<String> = map.keys().cloned().collect();
        self.scopes.push(Scope {
            values: HashMap::new(),
            pending: schedule.iter().cloned().collect(),
            current: None,
        });

        let mut idx = 0;
        let result = loop {
            if idx >= schedule.len() {
                break Ok(())
            }
            let key = schedule[idx].clone();
            let child_path = format!("{}/{}", path, key);
            self.scopes.last_mut().unwrap().current = Some(key.clone());

            let mut value = match map.remove(&key) {
                Some(value) => value,
                None => {
                    idx += 1;
                    continue
                }
            };
            let outcome = self.cook_value(&mut value, &child_path);
            map.insert(key.clone(), value);

            match outcome {
                Ok(()) => {
                    let scope = self.scopes.last_mut().unwrap();
                    scope.current = None;
                    scope.pending.remove(&key);
                    scope.values.insert(key.clone(), map[&key].clone());
                    idx += 1;
                }
                Err(Abort::Reorder(word)) => {
                    let scope = self.scopes.last_mut().unwrap();
                    scope.current = None;
                    if scope.pending.contains(&word) && word != key {
                        match schedule.iter().position(|k| *k == word) {
                            Some(pos) if pos > idx => {
                                // Run the dependency first, then retry
                                // the current key.
                                let moved = schedule.remove(pos);
                                schedule.insert(idx, moved);
                                continue
                            }
                            _ => {
                                break Err(Abort::Fail(Error::cook(
                                    child_path,
                                    format!(
                                        "Circular dependency \
                                         involving '{}'",
                                        word
                                    )
                                )))
                            }
                        }
                    }
                    break Err(Abort::Reorder(word))
                }
                Err(fail) => break Err(fail),
            }
        };

        self.scopes.pop();
        result
    }

    fn exec_program(
        &mut self, program: &str, path: &str
    ) -> Result<Data, Abort> {
        let location = if path.is_empty() {
            String::new()
        }
        else {
            format!("{}: ", path)
        };
        let mut stack: Vec<Data> = Vec::new();

        for field in fields_with_strings(program) {
            if let Some(stripped) = field.strip_prefix('\'') {
                match stripped.strip_suffix('\'') {
                    Some(literal) if !field.is_empty() && field.len() >= 2
                    => {
                        stack.push(
                            Data::Str(literal.replace("''", "'"))
                        );
                    }
                    _ => {
                        return Err(Abort::Fail(Error::cook(
                            path,
                            format!(
                                "Unterminated string constant: {}", field
                            )
                        )))
                    }
                }
            }
            else if let Some(components) = parse_oid_word(&field) {
                stack.push(Data::Ints(components));
            }
            else if let Some(value) = parse_int_word(&field) {
                stack.push(value);
            }
            else if let Some(func) = self.funcs.get(&field) {
                let func = func.clone();
                func(&mut stack, &location).map_err(Abort::Fail)?;
            }
            else if self.defs.has_type(&field) {
                let top = match stack.pop() {
                    Some(top) => top,
                    None => {
                        return Err(Abort::Fail(Error::cook(
                            path,
                            format!(
                                "Attempt to instantiate type \"{}\" \
                                 from empty stack",
                                field
                            )
                        )))
                    }
                };
                let inst = self.defs.instantiate(&field, &top)
                    .map_err(|err| {
                        Abort::Fail(
                            Error::cook(path, err.to_string())
                        )
                    })?;
                stack.push(Data::Inst(inst));
            }
            else if self.defs.has_value(&field) {
                // Cannot fail, existence was just checked.
                let inst = self.defs.value(&field).map_err(Abort::Fail)?;
                stack.push(Data::Inst(inst));
            }
            else {
                stack.push(self.lookup(&field, path)?);
            }
        }

        match stack.len() {
            0 => Err(Abort::Fail(Error::cook(path, format!(
                "No result value from program \"${}\"", program
            )))),
            1 => Ok(stack.pop().unwrap()),
            len => Err(Abort::Fail(Error::cook(path, format!(
                "{} elements left on stack after program \"${}\"",
                len, program
            )))),
        }
    }

    /// Looks a word up in the map scopes, innermost first, then in the
    /// explicit variable scopes.
    fn lookup(&self, word: &str, path: &str) -> Result<Data, Abort> {
        for scope in self.scopes.iter().rev() {
            if let Some(value) = scope.values.get(word) {
                return Ok(value.clone())
            }
            if scope.current.as_deref() == Some(word) {
                // The key being evaluated cannot be its own input.
                return Err(Abort::Fail(Error::cook(path, format!(
                    "Circular dependency involving '{}'", word
                ))))
            }
            if scope.pending.contains(word) {
                let current = match &scope.current {
                    Some(current) => current.as_str(),
                    None => "",
                };
                if word <= current {
                    // Alphabetical order would have evaluated it
                    // already; it was deferred, so this closes a cycle.
                    return Err(Abort::Fail(Error::cook(path, format!(
                        "Circular dependency involving '{}'", word
                    ))))
                }
                return Err(Abort::Reorder(word.to_string()))
            }
        }
        for vars in self.vars.iter().rev() {
            if let Some(value) = vars.get(word) {
                return Ok(value.clone())
            }
        }
        Err(Abort::Fail(Error::cook(path, format!(
            "Word is not a known function, variable, type or \
             constant: {}",
            word
        ))))
    }
}


//------------ Word forms ----------------------------------------------------

/// Splits a program into whitespace-separated words, keeping
/// single-quoted stretches together.
fn fields_with_strings(program: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_string = false;
    for ch in program.chars() {
        if ch == '\'' {
            in_string = !in_string;
        }
        if !in_string && ch.is_whitespace() {
            if !current.is_empty() {
                fields.push(std::mem::take(&mut current));
            }
        }
        else {
            current.push(ch);
        }
    }
    if !current.is_empty() {
        fields.push(current);
    }
    fields
}

/// Parses `N.N.N…` with at least three components.
fn parse_oid_word(word: &str) -> Option<Vec<i64>> {
    let parts: Vec<&str> = word.split('.').collect();
    if parts.len() < 3 {
        return None
    }
    parts.iter().map(|part| {
        if part.is_empty()
            || !part.bytes().all(|b| b.is_ascii_digit())
        {
            None
        }
        else {
            part.parse().ok()
        }
    }).collect()
}

/// Parses a signed decimal integer of arbitrary size.
fn parse_int_word(word: &str) -> Option<Data> {
    let digits = word.strip_prefix('-').unwrap_or(word);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None
    }
    match word.parse::<i64>() {
        Ok(int) => Some(Data::Int(int)),
        Err(_) => word.parse::<BigInt>().ok().map(Data::Big),
    }
}


//============ Tests =========================================================

#[cfg(test)]
mod test {
    use super::*;
    use crate::node::Value;

    fn defs(src: &str) -> Definitions {
        let mut defs = Definitions::new();
        defs.parse(src).unwrap();
        defs
    }

    fn empty_defs() -> Definitions {
        defs("DEFINITIONS IMPLICIT TAGS ::= BEGIN END")
    }

    fn run(defs: &Definitions, json: &str) -> Result<Data, Error> {
        let value: serde_json::Value = serde_json::from_str(json).unwrap();
        cook(defs, &[], &CookFunctions::new(), value.into())
    }

    fn get<'a>(data: &'a Data, key: &str) -> &'a Data {
        match data {
            Data::Map(map) => &map[key],
            _ => panic!("expected map"),
        }
    }

    #[test]
    fn plain_trees_pass_through() {
        let defs = empty_defs();
        let out = run(
            &defs, r#"{"a": 1, "b": [true, "plain"], "c": null}"#
        ).unwrap();
        match get(&out, "b") {
            Data::List(items) => {
                assert!(matches!(items[1], Data::Str(ref s) if s == "plain"));
            }
            _ => panic!("expected list"),
        }
    }

    #[test]
    fn string_literals_and_escapes() {
        let defs = empty_defs();
        let out = run(&defs, r#"{"a": "$'it''s'"}"#).unwrap();
        assert!(matches!(get(&out, "a"), Data::Str(s) if s == "it's"));
    }

    #[test]
    fn sibling_reference_in_order() {
        let defs = empty_defs();
        let out = run(
            &defs, r#"{"b": "$a", "a": "$'hello'"}"#
        ).unwrap();
        assert!(matches!(get(&out, "a"), Data::Str(s) if s == "hello"));
        assert!(matches!(get(&out, "b"), Data::Str(s) if s == "hello"));
    }

    #[test]
    fn forward_reference_is_reordered() {
        let defs = empty_defs();
        // "a" is evaluated first but needs "z".
        let out = run(
            &defs, r#"{"a": "$z", "z": "$'late'"}"#
        ).unwrap();
        assert!(matches!(get(&out, "a"), Data::Str(s) if s == "late"));
    }

    #[test]
    fn forward_reference_through_nesting() {
        let defs = empty_defs();
        let out = run(
            &defs, r#"{"a": {"x": "$z"}, "z": "$'deep'"}"#
        ).unwrap();
        assert!(
            matches!(get(get(&out, "a"), "x"), Data::Str(s) if s == "deep")
        );
    }

    #[test]
    fn mutual_reference_is_circular() {
        let defs = empty_defs();
        let err = run(&defs, r#"{"b": "$a", "a": "$b"}"#).unwrap_err();
        assert!(err.to_string().contains("Circular dependency"));
    }

    #[test]
    fn type_instantiation_word() {
        let defs = empty_defs();
        let out = run(&defs, r#"{"n": "$5 INTEGER"}"#).unwrap();
        match get(&out, "n") {
            Data::Inst(inst) => {
                assert_eq!(inst.value(), Some(&Value::Int(5)));
            }
            _ => panic!("expected instance"),
        }
    }

    #[test]
    fn value_lookup_word() {
        let defs = defs(
            "DEFINITIONS IMPLICIT TAGS ::= BEGIN \
             answer INTEGER ::= 42 END"
        );
        let out = run(&defs, r#"{"n": "$answer"}"#).unwrap();
        match get(&out, "n") {
            Data::Inst(inst) => {
                assert_eq!(inst.value(), Some(&Value::Int(42)));
            }
            _ => panic!("expected instance"),
        }
    }

    #[test]
    fn oid_word() {
        let defs = empty_defs();
        let out = run(
            &defs, r#"{"oid": "$1.2.840.113549 OBJECT_IDENTIFIER"}"#
        ).unwrap();
        match get(&out, "oid") {
            Data::Inst(inst) => {
                assert_eq!(
                    inst.value(),
                    Some(&Value::Oid(vec![1, 2, 840, 113549]))
                );
            }
            _ => panic!("expected instance"),
        }
    }

    #[test]
    fn host_function() {
        let defs = empty_defs();
        let mut funcs = CookFunctions::new();
        funcs.insert("dup".into(), Arc::new(
            |stack: &mut Vec<Data>, location: &str| {
                match stack.last() {
                    Some(top) => {
                        let copy = top.clone();
                        stack.push(copy);
                        Ok(())
                    }
                    None => Err(Error::cook(
                        location.trim_end_matches(": "),
                        "dup called on empty stack"
                    )),
                }
            }
        ));
        let value: serde_json::Value =
            serde_json::from_str(r#"{"x": "$'a' dup drop"}"#).unwrap();
        funcs.insert("drop".into(), Arc::new(
            |stack: &mut Vec<Data>, _: &str| {
                stack.pop();
                Ok(())
            }
        ));
        let out = cook(&defs, &[], &funcs, value.into()).unwrap();
        assert!(matches!(get(&out, "x"), Data::Str(s) if s == "a"));
    }

    #[test]
    fn explicit_variables() {
        let defs = empty_defs();
        let mut vars = HashMap::new();
        vars.insert("who".to_string(), Data::Str("world".into()));
        let value: serde_json::Value =
            serde_json::from_str(r#"{"x": "$who"}"#).unwrap();
        let out = cook(
            &defs, &[vars], &CookFunctions::new(), value.into()
        ).unwrap();
        assert!(matches!(get(&out, "x"), Data::Str(s) if s == "world"));
    }

    #[test]
    fn stack_discipline_errors() {
        let defs = empty_defs();
        let err = run(&defs, r#"{"x": "$"}"#).unwrap_err();
        assert!(err.to_string().contains("No result value"));
        let err = run(&defs, r#"{"x": "$'a' 'b'"}"#).unwrap_err();
        assert!(err.to_string().contains("elements left on stack"));
        let err = run(&defs, r#"{"x": "$INTEGER"}"#).unwrap_err();
        assert!(err.to_string().contains("empty stack"));
        let err = run(&defs, r#"{"x": "$nonsense"}"#).unwrap_err();
        assert!(err.to_string().contains("not a known function"));
    }

    #[test]
    fn unterminated_literal() {
        let defs = empty_defs();
        let err = run(&defs, r#"{"x": "$'open"}"#).unwrap_err();
        assert!(err.to_string().contains("Unterminated string constant"));
    }

    #[test]
    fn cooking_twice_is_identity() {
        let defs = empty_defs();
        let once = run(
            &defs, r#"{"b": "$a", "a": "$'hello'", "c": [1, 2]}"#
        ).unwrap();
        let twice = cook(
            &defs, &[], &CookFunctions::new(), once.clone()
        ).unwrap();
        match (get(&once, "b"), get(&twice, "b")) {
            (Data::Str(a), Data::Str(b)) => assert_eq!(a, b),
            _ => panic!("expected strings"),
        }
    }
}
