use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use qrcode::{QrCode, render::unicode};
use tracing::{error, info};

use crate::account::Account;
use crate::chain::explorer_url;
use crate::db::Buchfink;
use crate::error::BuchfinkError;
use crate::{ExploreArgs, InitArgs, ListArgs};

pub fn init(args: &InitArgs) -> Result<ExitCode> {
    match Buchfink::init(&args.directory) {
        Ok(db) => {
            info!("Initialized data directory {}", db.data_directory.display());
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => match e.downcast_ref::<BuchfinkError>() {
            Some(BuchfinkError::AlreadyInitialized(_)) => {
                error!("{}", e);
                Ok(ExitCode::FAILURE)
            }
            _ => Err(e),
        },
    }
}

/// `type: name (address) {tags}`
pub fn describe(account: &Account) -> String {
    let mut line = format!("{}: {}", account.account_type, account.name);
    if let Some(address) = &account.address {
        line.push_str(&format!(" ({address})"));
    }
    if !account.tags.is_empty() {
        line.push_str(&format!(" {{{}}}", account.tags.join(", ")));
    }
    line
}

fn qrcode(address: &str) -> Result<String> {
    let code = QrCode::new(address.as_bytes()).context("encode qrcode")?;
    Ok(code
        .render::<unicode::Dense1x2>()
        .dark_color(unicode::Dense1x2::Light)
        .light_color(unicode::Dense1x2::Dark)
        .build())
}

pub fn list(db: &Buchfink, args: &ListArgs) -> Result<ExitCode> {
    let accounts = args.selection.select(db, args.account_type.as_deref())?;
    for account in &accounts {
        match args.output.as_deref() {
            None => println!("{}", describe(account)),
            Some("qrcode") => match &account.address {
                Some(address) => {
                    println!("{}:", account.name);
                    println!("{}", qrcode(address)?);
                }
                None => println!("{}: no address", account.name),
            },
            Some(field) => match account.field(field) {
                Some(value) => println!("{value}"),
                None => bail!("unknown output field '{field}'"),
            },
        }
    }
    Ok(ExitCode::SUCCESS)
}

pub fn explore(db: &Buchfink, args: &ExploreArgs) -> Result<ExitCode> {
    let accounts = args.selection.select(db, None)?;
    let [account] = accounts.as_slice() else {
        error!("Select exactly one account to explore, got {}", accounts.len());
        return Ok(ExitCode::FAILURE);
    };
    let url = explorer_url(account)?;
    println!("{url}");
    webbrowser::open(&url).with_context(|| format!("open {url}"))?;
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AccountConfig;

    #[test]
    fn describes_accounts() {
        let account = Account::from_config(&AccountConfig {
            name: "ledger".into(),
            ethereum: Some("0xabc".into()),
            tags: vec!["cold".into(), "hw".into()],
            ..Default::default()
        })
        .unwrap();
        assert_eq!(describe(&account), "ethereum: ledger (0xabc) {cold, hw}");

        let paper = Account::from_config(&AccountConfig {
            name: "paper".into(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(describe(&paper), "generic: paper");
    }

    #[test]
    fn init_twice_fails_with_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let args = InitArgs {
            directory: dir.path().to_path_buf(),
        };
        assert_eq!(init(&args).unwrap(), ExitCode::SUCCESS);
        assert_eq!(init(&args).unwrap(), ExitCode::FAILURE);
    }

    #[test]
    fn renders_qrcodes() {
        let code = qrcode("bc1qxyz").unwrap();
        assert!(code.lines().count() > 10);
    }
}
