//! Procedural SQL authorization patterns (PL/SQL, T-SQL, PL/pgSQL)

use std::sync::LazyLock;

use authscan_core::ConstructKind;
use authscan_core::ConstructKind::{Attribute, ConditionalCheck, MethodCall, VariableAssignment};
use regex::Regex;

use crate::rules::{RuleSpec, RuleTable};
use crate::structure::{self, Block, StructureError};

pub(crate) static RULES: LazyLock<RuleTable> = LazyLock::new(|| {
    RuleTable::compile(&[
        RuleSpec::new(
            "grant_statement",
            "privilege",
            MethodCall,
            r"(?i)^\s*(?:GRANT|REVOKE|DENY)\s+\w+",
        ),
        RuleSpec::new(
            "role_membership",
            "role_check",
            ConditionalCheck,
            r"(?i)\b(?:IS_MEMBER|IS_ROLEMEMBER|IS_SRVROLEMEMBER|HAS_PERMS_BY_NAME|pg_has_role|has_table_privilege|has_schema_privilege|has_function_privilege)\s*\(",
        ),
        RuleSpec::new(
            "session_identity",
            "authentication",
            VariableAssignment,
            r"(?i)\b(?:SESSION_USER|CURRENT_USER|SYSTEM_USER|SUSER_SNAME|SUSER_NAME|USER_NAME|ORIGINAL_LOGIN)\b",
        ),
        RuleSpec::new(
            "session_context",
            "access_control",
            MethodCall,
            r"(?i)\bSYS_CONTEXT\s*\(\s*'USERENV'",
        ),
        RuleSpec::new(
            "row_level_security",
            "access_control",
            MethodCall,
            r"(?i)\bDBMS_RLS\s*\.\s*ADD_POLICY\b|\bCREATE\s+(?:SECURITY\s+)?POLICY\b|\bENABLE\s+ROW\s+LEVEL\s+SECURITY\b",
        ),
        RuleSpec::new(
            "definer_rights",
            "privilege",
            Attribute,
            r"(?i)\bEXECUTE\s+AS\s+(?:OWNER|CALLER|SELF|USER)\b|\bAUTHID\s+(?:DEFINER|CURRENT_USER)\b|\bSECURITY\s+DEFINER\b",
        ),
        RuleSpec::new(
            "access_denied",
            "authorization",
            MethodCall,
            r"(?i)\b(?:RAISE_APPLICATION_ERROR|RAISERROR|THROW|RAISE\s+EXCEPTION)\b.*(?:access|denied|permission|unauthori[sz]ed|privilege|not\s+allowed)",
        ),
        RuleSpec::new(
            "role_table",
            "role_check",
            MethodCall,
            r"(?i)\b(?:user_roles|role_permissions|user_permissions|dba_role_privs|session_roles|database_role_members)\b",
        ),
    ])
});

static CONDITIONAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(?:IF|ELSIF|ELSE\s+IF|WHEN|CASE|WHILE)\b|\bIF\s+(?:NOT\s+)?EXISTS\b").unwrap()
});

static ASSIGNMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i):=|^\s*SET\s+@?\w+\s*=|\bSELECT\b.*\bINTO\b|^\s*DECLARE\s+@\w+").unwrap()
});

pub(crate) fn blocks(content: &str) -> Result<Vec<Block>, StructureError> {
    structure::sql_blocks(content)
}

pub(crate) fn classify(line: &str) -> Option<ConstructKind> {
    if CONDITIONAL.is_match(line) {
        Some(ConditionalCheck)
    } else if ASSIGNMENT.is_match(line) {
        Some(VariableAssignment)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oracle_procedure() {
        let src = "CREATE OR REPLACE PROCEDURE close_account(p_id NUMBER) AUTHID DEFINER IS\n  v_user VARCHAR2(30) := SYS_CONTEXT('USERENV', 'SESSION_USER');\nBEGIN\n  IF NOT is_admin(v_user) THEN\n    RAISE_APPLICATION_ERROR(-20001, 'Access denied');\n  END IF;\nEND;\n";
        assert!(RULES.detect(src));
        let lines: Vec<&str> = src.lines().collect();
        let first: Vec<&str> = RULES.line_hits(lines[0]).map(|r| r.name).collect();
        assert_eq!(first, vec!["definer_rights"]);
        let second: Vec<&str> = RULES.line_hits(lines[1]).map(|r| r.name).collect();
        assert_eq!(second, vec!["session_identity", "session_context"]);
        let fifth: Vec<&str> = RULES.line_hits(lines[4]).map(|r| r.name).collect();
        assert_eq!(fifth, vec!["access_denied"]);
    }

    #[test]
    fn test_grant_anchored_per_line() {
        let src = "-- permissions\nGRANT EXECUTE ON close_account TO billing_admin;\n";
        assert!(RULES.detect(src));
        assert_eq!(RULES.line_hits("  grant select on t to r;").count(), 1);
        assert_eq!(RULES.line_hits("  -- no grant here").count(), 0);
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify("  IF IS_MEMBER('db_owner') = 0"), Some(ConditionalCheck));
        assert_eq!(classify("  v_user := USER;"), Some(VariableAssignment));
        assert_eq!(classify("  SET @who = SUSER_SNAME();"), Some(VariableAssignment));
        assert_eq!(classify("  GRANT SELECT ON t TO r;"), None);
    }
}
