use crate::error::{AppError, Result};
use chrono::{Datelike, NaiveDate};

/// 验证邮箱并返回详细错误信息
pub fn validate_email_format(email: &str) -> Result<()> {
    if email.trim().is_empty() {
        return Err(AppError::Validation("邮箱不能为空".to_string()));
    }

    if !validator::validate_email(email) {
        return Err(AppError::Validation("邮箱格式不正确".to_string()));
    }

    if email.len() > 254 {
        return Err(AppError::Validation("邮箱地址过长".to_string()));
    }

    Ok(())
}

/// 按月日修正后的周岁年龄
pub fn age_on(birth: NaiveDate, today: NaiveDate) -> i32 {
    let mut age = today.year() - birth.year();
    if (today.month(), today.day()) < (birth.month(), birth.day()) {
        age -= 1;
    }
    age
}

/// 注册年龄窗口：18 到 120 岁
pub fn validate_birth_date(birth: NaiveDate, today: NaiveDate) -> Result<()> {
    let age = age_on(birth, today);
    if !(18..=120).contains(&age) {
        return Err(AppError::Validation("年龄必须在18到120岁之间".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn age_adjusts_for_birthday_not_reached() {
        let today = date(2026, 8, 6);
        assert_eq!(age_on(date(2000, 8, 6), today), 26);
        assert_eq!(age_on(date(2000, 8, 7), today), 25);
        assert_eq!(age_on(date(2000, 12, 31), today), 25);
    }

    #[test]
    fn birth_date_window() {
        let today = date(2026, 8, 6);
        assert!(validate_birth_date(date(2008, 8, 6), today).is_ok()); // 正好18
        assert!(validate_birth_date(date(2009, 1, 1), today).is_err()); // 17
        assert!(validate_birth_date(date(1900, 1, 1), today).is_ok());
        assert!(validate_birth_date(date(1890, 1, 1), today).is_err()); // 超过120
    }

    #[test]
    fn email_checks() {
        assert!(validate_email_format("ana@example.com").is_ok());
        assert!(validate_email_format("").is_err());
        assert!(validate_email_format("not-an-email").is_err());
    }
}
