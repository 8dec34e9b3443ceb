//! Argument construction for the system `ssh` and `scp` clients.

use std::ffi::OsString;

use camino::Utf8Path;

use super::context::{ConnectionContext, PreparedCredential, SessionOptions};

/// Expands a leading `~/` prefix to the user's home directory.
///
/// If `HOME` is unset the input is returned unchanged.
///
/// # Examples
///
/// ```
/// # use skiff::transport::expand_tilde;
/// let home = std::env::var("HOME").expect("HOME should be set");
/// assert_eq!(expand_tilde("~/.ssh/id_ed25519"), format!("{home}/.ssh/id_ed25519"));
/// assert_eq!(expand_tilde("/absolute/path"), "/absolute/path");
/// ```
#[must_use]
pub fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/")
        && let Some(home) = std::env::var_os("HOME")
    {
        return format!("{}/{rest}", home.to_string_lossy());
    }
    path.to_owned()
}

/// Options shared by every `ssh`/`scp` invocation of a session.
///
/// Prompts are disabled so authentication problems fail fast, and unknown
/// host keys are accepted on first sight.
pub(crate) fn common_options(
    context: &ConnectionContext,
    options: &SessionOptions,
    credential: &PreparedCredential,
) -> Vec<OsString> {
    let connect_secs = context.connect_timeout.as_secs().max(1);
    let mut args = vec![
        OsString::from("-o"),
        OsString::from("BatchMode=yes"),
        OsString::from("-o"),
        OsString::from("StrictHostKeyChecking=accept-new"),
        OsString::from("-o"),
        OsString::from(format!("ConnectTimeout={connect_secs}")),
    ];

    if let Some(known_hosts) = options
        .known_hosts_file
        .as_deref()
        .filter(|path| !path.trim().is_empty())
    {
        args.push(OsString::from("-o"));
        args.push(OsString::from(format!(
            "UserKnownHostsFile={}",
            expand_tilde(known_hosts)
        )));
    }

    if let Some(identity) = credential.identity_file() {
        args.push(OsString::from("-i"));
        args.push(OsString::from(identity.as_str()));
        args.push(OsString::from("-o"));
        args.push(OsString::from("IdentitiesOnly=yes"));
    }

    args
}

/// Port flag for `ssh`.
pub(crate) fn ssh_port(port: u16) -> [OsString; 2] {
    [OsString::from("-p"), OsString::from(port.to_string())]
}

/// Port flag for `scp` (upper-case, unlike `ssh`).
pub(crate) fn scp_port(port: u16) -> [OsString; 2] {
    [OsString::from("-P"), OsString::from(port.to_string())]
}

/// Options binding an invocation to a control socket.
pub(crate) fn control_options(control_path: &Utf8Path, master: bool) -> Vec<OsString> {
    let mode = if master { "yes" } else { "no" };
    vec![
        OsString::from("-o"),
        OsString::from(format!("ControlMaster={mode}")),
        OsString::from("-o"),
        OsString::from(format!("ControlPath={control_path}")),
    ]
}

/// Renders `args` as a space-separated string for logs and assertions.
pub(crate) fn render(program: &str, args: &[OsString]) -> String {
    let mut rendered = String::from(program);
    for arg in args {
        rendered.push(' ');
        rendered.push_str(&arg.to_string_lossy());
    }
    rendered
}
