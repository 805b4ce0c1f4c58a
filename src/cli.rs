use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "xwinsys", about = "X11 window-system diagnostics")]
pub struct Cli {
    /// Display to open instead of $DISPLAY
    #[arg(long, global = true)]
    pub display: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Report what the display supports
    Probe,

    /// Print desktop settings published over XSETTINGS
    Settings {
        /// Keep running and print every change
        #[arg(long)]
        watch: bool,
    },

    /// Resolve atom names
    Atom {
        #[arg(required = true)]
        names: Vec<String>,

        /// Intern names that do not exist yet
        #[arg(long)]
        create: bool,
    },

    /// Read or write clipboard text
    Clipboard {
        #[command(subcommand)]
        action: ClipboardAction,
    },

    /// Open a test window and log the events it receives
    Window {
        #[arg(long, default_value = "xwinsys")]
        title: String,

        /// Ask for a 32-bit visual with alpha
        #[arg(long)]
        transparent: bool,
    },
}

#[derive(Subcommand)]
pub enum ClipboardAction {
    /// Print the current clipboard text
    Get,

    /// Put text on the clipboard
    Set {
        text: String,

        /// Keep serving the selection until interrupted
        #[arg(long)]
        hold: bool,
    },
}
