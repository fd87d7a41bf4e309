//! Pivot sheets: collectors with one accumulator per column key.
//!
//! A lazy sheet opens a column the first time a key is seen; a fixed-range
//! sheet pre-allocates integer columns and rejects anything else.

use crate::accumulator::{self, Arithmetic, SharedAccumulator, Tier};
use crate::collector::Collector;
use crate::error::Result;
use crate::level::LevelResolver;
use std::rc::Rc;

/// Recipe for the accumulators a sheet creates.
#[derive(Debug, Clone)]
pub struct SheetTemplate {
    tier: Tier,
    arithmetic: Arithmetic,
    resolver: Rc<LevelResolver>,
}

impl SheetTemplate {
    pub fn new(tier: Tier, arithmetic: Arithmetic, resolver: Rc<LevelResolver>) -> Self {
        SheetTemplate {
            tier,
            arithmetic,
            resolver,
        }
    }

    pub fn build(&self) -> SharedAccumulator {
        accumulator::build(self.tier, self.arithmetic, &self.resolver)
    }
}

pub struct Sheet;

impl Sheet {
    /// A sheet that grows a column per distinct key.
    pub fn lazy(name: impl Into<String>, template: SheetTemplate) -> Collector {
        Collector::new(name).with_sheet(template)
    }

    /// A sheet with the columns `from..=to` allocated up front.
    pub fn fixed_range(
        name: impl Into<String>,
        template: &SheetTemplate,
        from: i64,
        to: i64,
    ) -> Result<Collector> {
        let mut sheet = Collector::new(name);
        for column in from..=to {
            sheet.add_accumulator(column, template.build())?;
        }
        Ok(sheet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::Contribution;
    use crate::error::ReportError;
    use crate::number::Number;
    use crate::value::Key;

    fn template() -> SheetTemplate {
        let r = Rc::new(LevelResolver::new());
        r.set_max_level(1);
        r.set_current(1);
        SheetTemplate::new(Tier::Standard, Arithmetic::Native, r)
    }

    #[test]
    fn test_lazy_sheet_opens_columns_in_arrival_order() {
        let mut sheet = Sheet::lazy("by_month", template());
        sheet
            .add_values([
                (Key::from("feb"), Contribution::from(Number::Int(2))),
                (Key::from("jan"), Contribution::from(Number::Int(1))),
            ])
            .unwrap();
        sheet.add_value("feb", Some(Number::Int(5))).unwrap();

        assert_eq!(sheet.keys(), vec![Key::from("feb"), Key::from("jan")]);
        let totals = sheet.sum(Some(0), 1).unwrap();
        assert_eq!(totals.get("feb").unwrap().scalar(), Some(Number::Int(7)));
        assert_eq!(sheet.count(Some(0), 0).unwrap().scalar(), Some(Number::Int(3)));
    }

    #[test]
    fn test_fixed_range_rejects_unknown_columns() {
        let mut sheet = Sheet::fixed_range("quarters", &template(), 1, 4).unwrap();
        assert_eq!(sheet.len(), 4);
        sheet.add_value(3, Some(Number::Int(9))).unwrap();
        assert!(matches!(
            sheet.add_value(5, Some(Number::Int(1))),
            Err(ReportError::UnknownKey { .. })
        ));
        let totals = sheet.sum(Some(0), 1).unwrap();
        assert_eq!(totals.get(1).unwrap().scalar(), Some(Number::Int(0)));
        assert_eq!(totals.get(3).unwrap().scalar(), Some(Number::Int(9)));
    }

    #[test]
    fn test_views_of_lazy_sheet_do_not_grow() {
        let mut sheet = Sheet::lazy("s", template());
        sheet.add_value("a", Some(Number::Int(1))).unwrap();
        let mut view = sheet.filter(|_, _| true);
        assert!(matches!(
            view.add_value("b", Some(Number::Int(1))),
            Err(ReportError::UnknownKey { .. })
        ));
    }
}
