//! Policy lines: `subject,object,action,effect[,priority]`.
//!
//! Patterns support `*` globs. Lower priority wins; equal priorities keep declaration order.

use regex::Regex;

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    Allow,
    Deny,
}

#[derive(Debug, Clone)]
pub struct Policy {
    pub subject: String,
    pub object: String,
    pub action: String,
    pub effect: Effect,
    pub priority: i32,
    object_rx: Regex,
    action_rx: Regex,
}

impl Policy {
    pub fn parse(line: &str) -> AppResult<Policy> {
        let parts: Vec<&str> = line.split(',').map(|p| p.trim()).collect();
        if parts.len() < 4 || parts.len() > 5 || parts[..4].iter().any(|p| p.is_empty()) {
            return Err(AppError::user("invalid_policy".to_string(), format!("expected subject,object,action,effect[,priority]: '{}'", line)));
        }
        let effect = match parts[3].to_ascii_lowercase().as_str() {
            "allow" => Effect::Allow,
            "deny" => Effect::Deny,
            other => return Err(AppError::user("invalid_policy".to_string(), format!("unknown effect '{}' in '{}'", other, line))),
        };
        let priority = match parts.get(4) {
            Some(p) => p.parse::<i32>().map_err(|_| AppError::user("invalid_policy".to_string(), format!("bad priority '{}' in '{}'", p, line)))?,
            None => 0,
        };
        Ok(Policy {
            subject: parts[0].to_string(),
            object: parts[1].to_string(),
            action: parts[2].to_string(),
            effect,
            priority,
            object_rx: glob_to_regex(parts[1]),
            action_rx: glob_to_regex(parts[2]),
        })
    }

    pub fn matches_object(&self, object: &str) -> bool { self.object_rx.is_match(object) }

    pub fn matches_action(&self, action: &str) -> bool { self.action_rx.is_match(action) }

    pub fn allows(&self) -> bool { self.effect == Effect::Allow }
}

/// Parse and order a model's policy block.
pub fn parse_policies(lines: &[String]) -> AppResult<Vec<Policy>> {
    let mut out = lines.iter().map(|l| Policy::parse(l)).collect::<AppResult<Vec<_>>>()?;
    // stable: ties keep declaration order
    out.sort_by_key(|p| p.priority);
    Ok(out)
}

fn glob_to_regex(pattern: &str) -> Regex {
    let s = regex::escape(pattern).replace("\\*", ".*");
    Regex::new(&format!("^{}$", s)).unwrap_or_else(|_| Regex::new("^$").unwrap())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_four_and_five_fields() {
        let p = Policy::parse("$owner, *, __get__notes, allow").unwrap();
        assert_eq!(p.subject, "$owner");
        assert_eq!(p.priority, 0);
        assert!(p.allows());
        let p = Policy::parse("$everyone,*,*,deny,10").unwrap();
        assert_eq!(p.effect, Effect::Deny);
        assert_eq!(p.priority, 10);
    }

    #[test]
    fn rejects_malformed_lines() {
        for bad in ["a,b,c", "a,b,c,maybe", "a,b,c,allow,x", ",*,read,allow", "a,b,c,allow,1,extra"] {
            assert!(Policy::parse(bad).unwrap_err().is_user_input(), "{}", bad);
        }
    }

    #[test]
    fn globs_match_whole_value() {
        let p = Policy::parse("*,*,__get__*,allow").unwrap();
        assert!(p.matches_action("__get__owner"));
        assert!(!p.matches_action("create"));
        assert!(p.matches_object("5f1d7a2b9c8e4f0012345678"));
        let exact = Policy::parse("admin,n1,read,allow").unwrap();
        assert!(exact.matches_object("n1"));
        assert!(!exact.matches_object("n10"));
    }

    #[test]
    fn ordering_is_by_priority_then_declaration() {
        let lines: Vec<String> = ["a,*,*,allow,5", "b,*,*,deny", "c,*,*,allow"].iter().map(|s| s.to_string()).collect();
        let ps = parse_policies(&lines).unwrap();
        let subjects: Vec<&str> = ps.iter().map(|p| p.subject.as_str()).collect();
        assert_eq!(subjects, vec!["b", "c", "a"]);
    }
}
