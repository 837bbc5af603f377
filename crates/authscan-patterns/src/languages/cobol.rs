//! COBOL authorization patterns (CICS, RACF/SAF, hand-rolled role fields)

use std::sync::LazyLock;

use authscan_core::ConstructKind;
use authscan_core::ConstructKind::{ConditionalCheck, MethodCall, VariableAssignment};
use regex::Regex;

use crate::rules::{RuleSpec, RuleTable};
use crate::structure::{self, Block, StructureError};

pub(crate) static RULES: LazyLock<RuleTable> = LazyLock::new(|| {
    RuleTable::compile(&[
        RuleSpec::new(
            "cics_security",
            "authorization",
            MethodCall,
            r"(?i)\bEXEC\s+CICS\s+(?:QUERY\s+SECURITY|VERIFY\s+PASSWORD|SIGNON|CHANGE\s+PASSWORD|ASSIGN\s+USERID)",
        ),
        RuleSpec::new(
            "saf_call",
            "authorization",
            MethodCall,
            r#"(?i)\bCALL\s+['"](?:RACROUTE|ICHEINTY|IRRSIA00|IRRSEQ00|RACF\w*|SAF\w*)['"]"#,
        ),
        RuleSpec::new(
            "embedded_grant",
            "privilege",
            MethodCall,
            r"(?i)\bEXEC\s+SQL\s+(?:GRANT|REVOKE)\b",
        ),
        RuleSpec::new(
            "identity_condition",
            "role_check",
            ConditionalCheck,
            r"(?i)\b(?:IF|WHEN)\b.*\b(?:[\w-]*-)?(?:USER-?ID|OPERATOR-ID|USER-ROLE|ROLE-CODE|AUTH-LEVEL|ACCESS-LEVEL|SEC-LEVEL)\b",
        ),
        RuleSpec::new(
            "role_evaluate",
            "role_check",
            ConditionalCheck,
            r"(?i)\bEVALUATE\b.*\b(?:[\w-]*-)?(?:ROLE|USER-TYPE|AUTH|ACCESS)[\w-]*",
        ),
        RuleSpec::new(
            "access_flag",
            "access_control",
            ConditionalCheck,
            r"(?i)\b(?:NOT-AUTHORI[SZ]ED|AUTHORI[SZ]ED|ACCESS-GRANTED|ACCESS-DENIED)\b",
        ),
        RuleSpec::new(
            "access_field_move",
            "access_control",
            VariableAssignment,
            r"(?i)\bMOVE\b.*\bTO\s+(?:[\w-]*-)?(?:AUTH|ACCESS|PERMISSION|ROLE|SECURITY)[\w-]*",
        ),
    ])
});

static CONDITIONAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^[\d ]{0,6}\s*(?:IF|ELSE|EVALUATE|WHEN|PERFORM\s+UNTIL)\b").unwrap()
});

static ASSIGNMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^[\d ]{0,6}\s*(?:MOVE|SET|COMPUTE|INITIALIZE)\b").unwrap()
});

pub(crate) fn blocks(content: &str) -> Result<Vec<Block>, StructureError> {
    structure::cobol_blocks(content)
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

    const PROGRAM: &str = "\
       IDENTIFICATION DIVISION.
       PROGRAM-ID. ACCTUPD.
       PROCEDURE DIVISION.
       MAIN-PARA.
           EXEC CICS ASSIGN USERID(WS-USERID) END-EXEC.
           IF WS-USER-ROLE = 'ADMIN'
               MOVE 'Y' TO WS-ACCESS-FLAG
           ELSE
               MOVE 'N' TO WS-ACCESS-FLAG
           END-IF.
           STOP RUN.
";

    #[test]
    fn test_program_hits() {
        assert!(RULES.detect(PROGRAM));
        let names: Vec<&str> = PROGRAM
            .lines()
            .flat_map(|l| RULES.line_hits(l).map(|r| r.name).collect::<Vec<_>>())
            .collect();
        assert_eq!(
            names,
            vec![
                "cics_security",
                "identity_condition",
                "access_field_move",
                "access_field_move"
            ]
        );
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify("000300     IF WS-USER-ROLE = 'ADMIN'"), Some(ConditionalCheck));
        assert_eq!(classify("           MOVE 'Y' TO WS-ACCESS-FLAG"), Some(VariableAssignment));
        assert_eq!(classify("           CALL 'RACROUTE' USING WS-PARMS"), None);
    }

    #[test]
    fn test_blocks_parse() {
        let blocks = blocks(PROGRAM).unwrap();
        assert!(blocks.contains(&Block { start: 6, end: 10 }));
    }
}
