//! Mailbox formatting for the `From`, `To` and `Cc` header lines.

/// One mailbox from an address header.
///
/// `"José <jose@example.com>"` → `name = "José"`, `address = "jose@example.com"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mailbox {
    /// Display name, possibly empty.
    pub name: String,
    /// Bare address, or the raw token when it does not look like one.
    pub address: String,
}

impl Mailbox {
    /// Parse a single mailbox. Never fails: unrecognized input becomes `address`.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();

        if let (Some(open), Some(close)) = (trimmed.rfind('<'), trimmed.rfind('>')) {
            if close > open {
                return Self {
                    name: unquote(&trimmed[..open]),
                    address: trimmed[open + 1..close].trim().to_string(),
                };
            }
        }

        Self {
            name: String::new(),
            address: trimmed.to_string(),
        }
    }

    /// Render as `Name <address>`, or just the address.
    pub fn display(&self) -> String {
        match (self.name.is_empty(), self.address.is_empty()) {
            (true, _) => self.address.clone(),
            (false, true) => self.name.clone(),
            (false, false) => format!("{} <{}>", self.name, self.address),
        }
    }
}

impl std::fmt::Display for Mailbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.display())
    }
}

/// Split an address header on commas that sit outside quotes and angle brackets.
pub fn parse_mailbox_list(raw: &str) -> Vec<Mailbox> {
    let mut mailboxes = Vec::new();
    let mut start = 0;
    let mut quoted = false;
    let mut angle_depth = 0u32;

    for (pos, ch) in raw.char_indices() {
        match ch {
            '"' => quoted = !quoted,
            '<' if !quoted => angle_depth += 1,
            '>' if !quoted => angle_depth = angle_depth.saturating_sub(1),
            ',' if !quoted && angle_depth == 0 => {
                push_mailbox(&mut mailboxes, &raw[start..pos]);
                start = pos + 1;
            }
            _ => {}
        }
    }
    push_mailbox(&mut mailboxes, &raw[start..]);
    mailboxes
}

/// Normalize an address header for display: each mailbox tidied, joined by `", "`.
pub fn display_mailbox_list(raw: &str) -> String {
    parse_mailbox_list(raw)
        .iter()
        .map(Mailbox::display)
        .collect::<Vec<_>>()
        .join(", ")
}

fn push_mailbox(out: &mut Vec<Mailbox>, segment: &str) {
    let mailbox = Mailbox::parse(segment);
    if !mailbox.address.is_empty() || !mailbox.name.is_empty() {
        out.push(mailbox);
    }
}

fn unquote(s: &str) -> String {
    let trimmed = s.trim();
    trimmed
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
        .unwrap_or(trimmed)
        .trim()
        .to_string()
}
