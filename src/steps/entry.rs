use tracing::{debug, info};

use super::{StepEnv, stats, step_failure};
use crate::desktop::{InputAction, templates};
use crate::recovery::{ErrorType, Failure, Severity};
use crate::state_machine::{Event, StateContext, StateHandler};
use crate::work_item::{WorkItem, format_quantity};

/// Offset from the top of the items grid template to its first row.
const FIRST_ROW_OFFSET: i32 = 20;

/// Header fields of the sales order form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderField {
    Nit,
    OrderNumber,
    DeliveryDate,
}

impl OrderField {
    fn template(self) -> &'static str {
        match self {
            OrderField::Nit => templates::NIT_FIELD,
            OrderField::OrderNumber => templates::ORDER_FIELD,
            OrderField::DeliveryDate => templates::DATE_FIELD,
        }
    }

    fn stat_key(self) -> &'static str {
        match self {
            OrderField::Nit => stats::NIT,
            OrderField::OrderNumber => stats::ORDER_NUMBER,
            OrderField::DeliveryDate => stats::DELIVERY_DATE,
        }
    }

    fn value(self, item: &WorkItem) -> Result<String, Failure> {
        let order = &item.payload;
        match self {
            OrderField::Nit => Ok(order.nit.trim().to_string()),
            OrderField::OrderNumber => Ok(order.order_number.trim().to_string()),
            OrderField::DeliveryDate => order
                .erp_delivery_date()
                .map_err(|msg| Failure::new(ErrorType::DataProcessing, Severity::High, msg)),
        }
    }
}

/// LOADING_NIT, LOADING_ORDER, LOADING_DATE: click the field, type, tab out.
pub struct FieldEntry {
    env: StepEnv,
    field: OrderField,
    done: Event,
}

impl FieldEntry {
    pub fn new(env: StepEnv, field: OrderField, done: Event) -> Self {
        Self { env, field, done }
    }
}

impl StateHandler for FieldEntry {
    fn execute(&self, ctx: &mut StateContext, item: &WorkItem) -> Result<Event, Failure> {
        let value = self.field.value(item)?;
        let point = self
            .env
            .find(self.field.template())
            .map_err(|e| step_failure(ErrorType::TemplateMatching, Severity::Medium, &e))?;

        self.env
            .desktop
            .perform_all(&[
                InputAction::Click(point),
                InputAction::TypeText(value.clone()),
                InputAction::press("tab"),
            ])
            .map_err(|e| step_failure(ErrorType::DataProcessing, Severity::Medium, &e))?;
        self.env.settle();

        debug!(field = ?self.field, %value, "field loaded");
        ctx.set_stat(self.field.stat_key(), value);
        Ok(self.done)
    }
}

/// POSITIONING_MOUSE: put the cursor on the first row of the items grid.
pub struct PositionMouse {
    env: StepEnv,
}

impl PositionMouse {
    pub fn new(env: StepEnv) -> Self {
        Self { env }
    }
}

impl StateHandler for PositionMouse {
    fn execute(&self, ctx: &mut StateContext, _item: &WorkItem) -> Result<Event, Failure> {
        let grid = self
            .env
            .find(templates::ITEMS_GRID)
            .map_err(|e| step_failure(ErrorType::TemplateMatching, Severity::Medium, &e))?;
        let first_row = grid.offset(0, FIRST_ROW_OFFSET);
        self.env
            .desktop
            .input
            .perform(&InputAction::Click(first_row))
            .map_err(|e| step_failure(ErrorType::SystemError, Severity::High, &e))?;
        ctx.set_stat(stats::GRID_ORIGIN, first_row.to_string());
        Ok(Event::MousePositioned)
    }
}

/// LOADING_ITEMS: one grid row per order line. Lines already typed in an
/// earlier attempt are skipped.
pub struct LoadItems {
    env: StepEnv,
}

impl LoadItems {
    pub fn new(env: StepEnv) -> Self {
        Self { env }
    }

    fn row(line: &crate::work_item::OrderLine) -> Vec<InputAction> {
        let mut actions = vec![
            InputAction::TypeText(line.code.trim().to_string()),
            InputAction::press("tab"),
            InputAction::TypeText(format_quantity(line.quantity)),
            InputAction::press("tab"),
        ];
        if let Some(price) = line.price {
            actions.push(InputAction::TypeText(format_quantity(price)));
            actions.push(InputAction::press("tab"));
        }
        actions.push(InputAction::press("enter"));
        actions
    }
}

impl StateHandler for LoadItems {
    fn execute(&self, ctx: &mut StateContext, item: &WorkItem) -> Result<Event, Failure> {
        let lines = &item.payload.items;
        let done = ctx.stat_u64(stats::ITEMS_LOADED).unwrap_or(0) as usize;
        if done > 0 {
            debug!(done, total = lines.len(), "resuming item entry");
        }

        for (index, line) in lines.iter().enumerate().skip(done) {
            self.env
                .desktop
                .perform_all(&Self::row(line))
                .map_err(|e| {
                    step_failure(ErrorType::DataProcessing, Severity::Medium, &e)
                        .at_item(index)
                        .with_info("code", line.code.clone())
                })?;
            self.env.settle();
            ctx.set_stat(stats::ITEMS_LOADED, (index + 1) as u64);
        }

        info!(item = %item.id, lines = lines.len(), "items loaded");
        Ok(Event::ItemsLoaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::desktop::Point;
    use crate::steps::testing::rig;

    #[test]
    fn field_entry_types_value_and_records_it() {
        let rig = rig(false);
        let handler = FieldEntry::new(rig.env.clone(), OrderField::DeliveryDate, Event::DateLoaded);
        let mut ctx = StateContext::default();

        let event = handler.execute(&mut ctx, &WorkItem::sample("order1.json")).unwrap();

        assert_eq!(event, Event::DateLoaded);
        assert_eq!(rig.sim.typed_text(), vec!["15.03.2024".to_string()]);
        assert_eq!(ctx.stat_str(stats::DELIVERY_DATE), Some("15.03.2024"));
        assert_eq!(rig.sim.actions().last(), Some(&InputAction::press("tab")));
    }

    #[test]
    fn missing_field_is_a_template_failure() {
        let rig = rig(false);
        rig.sim.hide_template(templates::NIT_FIELD);
        let handler = FieldEntry::new(rig.env.clone(), OrderField::Nit, Event::NitLoaded);

        let failure = handler
            .execute(&mut StateContext::default(), &WorkItem::sample("order1.json"))
            .unwrap_err();

        assert_eq!(failure.error_type, ErrorType::TemplateMatching);
        assert_eq!(failure.severity, Severity::Medium);
        assert!(rig.sim.typed_text().is_empty());
    }

    #[test]
    fn mouse_goes_to_first_row() {
        let rig = rig(false);
        let mut ctx = StateContext::default();

        PositionMouse::new(rig.env.clone())
            .execute(&mut ctx, &WorkItem::sample("order1.json"))
            .unwrap();

        let expected = Point::new(640, 380);
        assert_eq!(rig.sim.actions(), vec![InputAction::Click(expected)]);
        assert_eq!(ctx.stat_str(stats::GRID_ORIGIN), Some("(640, 380)"));
    }

    #[test]
    fn items_are_typed_in_order() {
        let rig = rig(false);
        let mut ctx = StateContext::default();

        LoadItems::new(rig.env.clone())
            .execute(&mut ctx, &WorkItem::sample("order1.json"))
            .unwrap();

        assert_eq!(
            rig.sim.typed_text(),
            vec!["A-100", "2", "B-200", "1.5", "12.5"]
        );
        assert_eq!(ctx.stat_u64(stats::ITEMS_LOADED), Some(2));
    }

    #[test]
    fn failed_line_carries_its_index_and_resume_skips_done_lines() {
        let rig = rig(false);
        let handler = LoadItems::new(rig.env.clone());
        let item = WorkItem::sample("order1.json");
        let mut ctx = StateContext::default();
        ctx.set_stat(stats::ITEMS_LOADED, 1u64);
        rig.sim.fail_input(1);

        let failure = handler.execute(&mut ctx, &item).unwrap_err();
        assert_eq!(failure.error_type, ErrorType::DataProcessing);
        assert_eq!(failure.item_index, Some(1));
        assert_eq!(failure.additional_info["code"], "B-200");
        assert_eq!(ctx.stat_u64(stats::ITEMS_LOADED), Some(1));

        handler.execute(&mut ctx, &item).unwrap();
        assert_eq!(rig.sim.typed_text(), vec!["B-200", "1.5", "12.5"]);
        assert_eq!(ctx.stat_u64(stats::ITEMS_LOADED), Some(2));
    }
}
