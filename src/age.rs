//! age.rs
//!
//! Calendar-aware age in years, months and days, rendered as
//!     "X years, Y months, Z days"
//!
//! Chrono has no year/month/day diff, so we count whole months between the
//! two dates and take the remaining days from the anniversary. Adding months
//! clamps to the end of shorter months (Jan 31 + 1 month = Feb 28/29), which
//! keeps leap-day birthdays and varying month lengths consistent.

use std::fmt;

use chrono::{Datelike, Months, NaiveDate};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Age {
    pub years: u32,
    pub months: u32,
    pub days: u32,
}

impl Age {
    /// Age on `today` for someone born on `birthdate`. A future birthdate yields zero.
    pub fn between(birthdate: NaiveDate, today: NaiveDate) -> Self {
        if today <= birthdate {
            return Age {
                years: 0,
                months: 0,
                days: 0,
            };
        }

        let mut total_months = (today.year() - birthdate.year()) * 12 + today.month() as i32
            - birthdate.month() as i32;

        // Step back one month if the last monthly anniversary lands after today.
        let mut anniversary = add_months(birthdate, total_months);
        if anniversary > today {
            total_months -= 1;
            anniversary = add_months(birthdate, total_months);
        }

        let total_months = total_months.max(0) as u32;
        Age {
            years: total_months / 12,
            months: total_months % 12,
            days: (today - anniversary).num_days().max(0) as u32,
        }
    }

    /// True on the exact birthday (whole number of years).
    pub fn is_birthday(&self) -> bool {
        self.months == 0 && self.days == 0
    }
}

impl fmt::Display for Age {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} year{}, {} month{}, {} day{}",
            self.years,
            plural(self.years),
            self.months,
            plural(self.months),
            self.days,
            plural(self.days)
        )?;
        if self.is_birthday() {
            write!(f, " 🎂")?;
        }
        Ok(())
    }
}

fn add_months(date: NaiveDate, months: i32) -> NaiveDate {
    date.checked_add_months(Months::new(months.max(0) as u32))
        .unwrap_or(date)
}

fn plural(n: u32) -> &'static str {
    if n == 1 { "" } else { "s" }
}
