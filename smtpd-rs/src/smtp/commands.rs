use crate::error::{Result, SmtpdError};

#[derive(Debug, Clone, PartialEq)]
pub enum SmtpCommand {
    Helo(String),
    Ehlo(String),
    StartTls,
    Auth {
        mechanism: String,
        initial_response: Option<String>,
    },
    MailFrom(String),
    RcptTo(String),
    Data,
    Rset,
    Quit,
    Noop,
    Unknown(String),
}

impl SmtpCommand {
    pub fn parse(line: &str) -> Result<Self> {
        let line = line.trim();
        if line.is_empty() {
            return Err(SmtpdError::Syntax("empty command".to_string()));
        }

        let parts: Vec<&str> = line.splitn(2, ' ').collect();
        let command = parts[0].to_uppercase();
        let args = parts.get(1).map(|s| s.trim()).unwrap_or("");

        match command.as_str() {
            "HELO" => {
                if args.is_empty() {
                    return Err(SmtpdError::Syntax("HELO requires domain".to_string()));
                }
                Ok(SmtpCommand::Helo(args.to_string()))
            }
            "EHLO" => {
                if args.is_empty() {
                    return Err(SmtpdError::Syntax("EHLO requires domain".to_string()));
                }
                Ok(SmtpCommand::Ehlo(args.to_string()))
            }
            "STARTTLS" => Ok(SmtpCommand::StartTls),
            "AUTH" => {
                // AUTH <mechanism> [initial-response]
                let mut words = args.split_whitespace();
                let mechanism = words
                    .next()
                    .ok_or_else(|| SmtpdError::Syntax("AUTH requires mechanism".to_string()))?
                    .to_string();
                let initial_response = words.next().map(|s| s.to_string());
                Ok(SmtpCommand::Auth {
                    mechanism,
                    initial_response,
                })
            }
            "MAIL" => {
                let from = Self::parse_mail_from(args)?;
                Ok(SmtpCommand::MailFrom(from))
            }
            "RCPT" => {
                let to = Self::parse_rcpt_to(args)?;
                Ok(SmtpCommand::RcptTo(to))
            }
            "DATA" => Ok(SmtpCommand::Data),
            "RSET" => Ok(SmtpCommand::Rset),
            "QUIT" => Ok(SmtpCommand::Quit),
            "NOOP" => Ok(SmtpCommand::Noop),
            _ => Ok(SmtpCommand::Unknown(command)),
        }
    }

    fn parse_mail_from(args: &str) -> Result<String> {
        // Expected format: FROM:<email@domain.com>
        if !args.to_uppercase().starts_with("FROM:") {
            return Err(SmtpdError::Syntax("invalid MAIL FROM syntax".to_string()));
        }

        let email = args[5..].trim();
        let email = if email.starts_with('<') && email.ends_with('>') {
            &email[1..email.len() - 1]
        } else {
            email
        };

        Ok(email.to_string())
    }

    fn parse_rcpt_to(args: &str) -> Result<String> {
        // Expected format: TO:<email@domain.com>
        if !args.to_uppercase().starts_with("TO:") {
            return Err(SmtpdError::Syntax("invalid RCPT TO syntax".to_string()));
        }

        let email = args[3..].trim();
        let email = if email.starts_with('<') && email.ends_with('>') {
            &email[1..email.len() - 1]
        } else {
            email
        };

        Ok(email.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_helo() {
        let cmd = SmtpCommand::parse("HELO example.com").unwrap();
        assert_eq!(cmd, SmtpCommand::Helo("example.com".to_string()));
    }

    #[test]
    fn test_parse_ehlo() {
        let cmd = SmtpCommand::parse("EHLO example.com").unwrap();
        assert_eq!(cmd, SmtpCommand::Ehlo("example.com".to_string()));
    }

    #[test]
    fn test_parse_mail_from() {
        let cmd = SmtpCommand::parse("MAIL FROM:<sender@example.com>").unwrap();
        assert_eq!(cmd, SmtpCommand::MailFrom("sender@example.com".to_string()));
    }

    #[test]
    fn test_parse_mail_from_case_insensitive() {
        let cmd = SmtpCommand::parse("mail from:<sender@example.com>").unwrap();
        assert_eq!(cmd, SmtpCommand::MailFrom("sender@example.com".to_string()));
    }

    #[test]
    fn test_parse_rcpt_to() {
        let cmd = SmtpCommand::parse("RCPT TO:<recipient@example.com>").unwrap();
        assert_eq!(cmd, SmtpCommand::RcptTo("recipient@example.com".to_string()));
    }

    #[test]
    fn test_parse_starttls() {
        let cmd = SmtpCommand::parse("STARTTLS").unwrap();
        assert_eq!(cmd, SmtpCommand::StartTls);
    }

    #[test]
    fn test_parse_auth_with_initial_response() {
        let cmd = SmtpCommand::parse("AUTH PLAIN AGZvbwBiYXI=").unwrap();
        assert_eq!(
            cmd,
            SmtpCommand::Auth {
                mechanism: "PLAIN".to_string(),
                initial_response: Some("AGZvbwBiYXI=".to_string()),
            }
        );
    }

    #[test]
    fn test_parse_auth_without_initial_response() {
        let cmd = SmtpCommand::parse("AUTH LOGIN").unwrap();
        assert_eq!(
            cmd,
            SmtpCommand::Auth {
                mechanism: "LOGIN".to_string(),
                initial_response: None,
            }
        );
    }

    #[test]
    fn test_parse_auth_missing_mechanism() {
        assert!(SmtpCommand::parse("AUTH").is_err());
    }

    #[test]
    fn test_parse_data() {
        let cmd = SmtpCommand::parse("DATA").unwrap();
        assert_eq!(cmd, SmtpCommand::Data);
    }

    #[test]
    fn test_parse_quit() {
        let cmd = SmtpCommand::parse("QUIT").unwrap();
        assert_eq!(cmd, SmtpCommand::Quit);
    }

    #[test]
    fn test_parse_unknown() {
        let cmd = SmtpCommand::parse("VRFY user").unwrap();
        assert_eq!(cmd, SmtpCommand::Unknown("VRFY".to_string()));
    }
}
