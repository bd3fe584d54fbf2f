#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Start,
    Mirror { url: String, archive: bool },
    MirrorStatus,
    GetFolder,
    List { query: String },
    CancelMirror,
    CancelAll,
}

/// Parses a bot command. Names are case-insensitive. When `bot_name` is set
/// the command must be addressed as `/cmd@bot_name`.
pub fn parse_command(text: &str, bot_name: Option<&str>) -> Option<Command> {
    let text = text.trim();
    let head = text.strip_prefix('/')?;
    let (head, rest) = match head.split_once(char::is_whitespace) {
        Some((h, r)) => (h, r.trim()),
        None => (head, ""),
    };
    let (name, addressee) = match head.split_once('@') {
        Some((n, a)) => (n, Some(a)),
        None => (head, None),
    };
    match (bot_name, addressee) {
        (Some(expected), Some(got)) if got.eq_ignore_ascii_case(expected) => {}
        (None, None) => {}
        _ => return None,
    }

    let command = match name.to_ascii_lowercase().as_str() {
        "start" => Command::Start,
        "mirror" | "mirrortar" | "list" if rest.is_empty() => return None,
        "mirror" => Command::Mirror { url: rest.to_string(), archive: false },
        "mirrortar" => Command::Mirror { url: rest.to_string(), archive: true },
        "mirrorstatus" => Command::MirrorStatus,
        "getfolder" => Command::GetFolder,
        "list" => Command::List { query: rest.to_string() },
        "cancelmirror" => Command::CancelMirror,
        "cancelall" => Command::CancelAll,
        _ => return None,
    };
    Some(command)
}
