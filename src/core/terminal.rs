use console::{Emoji, style};

pub static SUCCESS_ICON: Emoji<'_, '_> = Emoji("✅ ", "");
pub static INFO_ICON: Emoji<'_, '_> = Emoji("ℹ️  ", "");
pub static WARN_ICON: Emoji<'_, '_> = Emoji("⚠️  ", "");
pub static ERROR_ICON: Emoji<'_, '_> = Emoji("❌ ", "");
pub static GLOBE: Emoji<'_, '_> = Emoji("🌐 ", "");
pub static GEAR: Emoji<'_, '_> = Emoji("⚙️  ", "");
pub static RECORD: Emoji<'_, '_> = Emoji("🔴 ", "");

pub fn print_success(msg: &str) {
    println!("{} {}", SUCCESS_ICON, style(msg).green());
}

pub fn print_info(msg: &str) {
    println!("{} {}", INFO_ICON, style(msg).blue());
}

pub fn print_warn(msg: &str) {
    println!("{} {}", WARN_ICON, style(msg).yellow());
}

pub fn print_error(msg: &str) {
    eprintln!("{} {}", ERROR_ICON, style(msg).red().bold());
}

pub fn print_status(label: &str, msg: &str) {
    println!("  {} {}: {}", GEAR, style(label).bold().cyan(), msg);
}

pub fn print_link(label: &str, url: &str) {
    println!(
        "  {} {}: {}",
        GLOBE,
        style(label).bold(),
        style(url).underlined().cyan()
    );
}

pub fn print_recording(session: &str, cast: &str) {
    println!(
        "{} {} {} {}",
        RECORD,
        style("Recording session").bold(),
        style(session).bold().magenta(),
        style(format!("into {cast}")).dim()
    );
}

pub fn print_usage(commands: &[(&str, &str)], options: &[(&str, &str)]) {
    println!(
        "\n {} {} <command> [options]\n",
        style("Usage:").bold(),
        style("promptcast").green()
    );
    println!(" {}", style("Commands").bold().underlined());
    for (name, about) in commands {
        println!("   {:<10} {}", style(name).cyan(), about);
    }
    println!("\n {}", style("Options").bold().underlined());
    for (flag, about) in options {
        println!("   {:<22} {}", style(flag).yellow(), style(about).dim());
    }
    println!();
}
