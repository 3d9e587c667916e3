//! HTML templates, compiled into the binary.

use tera::Tera;

pub const PREVIEW_EMAIL: &str = "dbmail/preview_email.html";
pub const LOGIN: &str = "accounts/login.html";

pub fn load() -> Result<Tera, tera::Error> {
    let mut tera = Tera::default();
    tera.add_raw_templates(vec![
        ("base.html", include_str!("../../templates/base.html")),
        (PREVIEW_EMAIL, include_str!("../../templates/dbmail/preview_email.html")),
        (LOGIN, include_str!("../../templates/accounts/login.html")),
    ])?;
    Ok(tera)
}
