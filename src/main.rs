//! # Batch Calculator
//!
//! Line-oriented shell over stdin for formulating batches. Each command is one
//! finished edit: it is applied and settled before the next line is read.

use anyhow::{Context, Result};
use log::info;
use std::env;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use batch_formulation::app_config::AppConfig;
use batch_formulation::batch_model::{BatchFormulation, QuantityField, UnitCountMode};
use batch_formulation::batch_store::{with_retry, BatchRepository, JsonFileBatchRepository, StoreRecoveryConfig};
use batch_formulation::db::PgBatchRepository;
use batch_formulation::derivation::{Advisory, Edit};
use batch_formulation::localization::LocalizationManager;
use batch_formulation::session::{BatchSession, PersistenceStatus};
use batch_formulation::unit_converter::{to_display, WeightUnit};

enum Flow {
    Continue,
    Quit,
}

struct Shell {
    session: BatchSession,
    repository: Arc<dyn BatchRepository>,
    i18n: LocalizationManager,
    recovery: StoreRecoveryConfig,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if env::var("LOG_FORMAT").as_deref() == Ok("json") {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn parse_index(arg: Option<&str>) -> Option<usize> {
    arg?.parse::<usize>().ok()?.checked_sub(1)
}

fn cell(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{v:.2}"))
}

impl Shell {
    fn print_advisories(&self, advisories: &[Advisory]) {
        for advisory in advisories {
            println!("! {}", self.i18n.advisory_message(advisory));
        }
    }

    /// Apply and settle one command's edit
    fn commit(&mut self, edit: Edit) {
        let mut shown: Vec<Advisory> = self
            .session
            .edit(edit)
            .iter()
            .filter(|advisory| advisory.is_rejection())
            .cloned()
            .collect();
        shown.extend(self.session.settle().iter().cloned());
        self.print_advisories(&shown);
    }

    fn render(&self) -> String {
        let batch: &BatchFormulation = self.session.state();
        let unit = self.session.unit();
        let mode = match batch.unit_count_mode {
            UnitCountMode::Manual => "manual",
            UnitCountMode::Auto => "auto",
        };

        let mut out = format!(
            "{} | {} units x {} g | {} count\n",
            if batch.name.is_empty() { "(unnamed)" } else { batch.name.as_str() },
            cell(batch.unit_count),
            cell(batch.unit_weight),
            mode
        );
        let derived = batch.derived_ingredient_index();
        for (i, ingredient) in batch.ingredients.iter().enumerate() {
            out.push_str(&format!(
                "{}{:>2}. {:<20} {:>8} % {:>10} g {:>10} {}\n",
                if i == derived { "*" } else { " " },
                i + 1,
                ingredient.name,
                cell(ingredient.percentage),
                cell(ingredient.weight_per_unit),
                cell(ingredient.total_weight.map(|grams| to_display(grams, unit))),
                unit.symbol()
            ));
        }
        out.push_str(&self.i18n.t_args(
            "shell-total-weight",
            &[("weight", &self.session.display_batch_weight())],
        ));
        out
    }

    async fn save(&mut self) {
        let request = match self.session.begin_save() {
            Ok(request) => request,
            Err(_) => {
                println!("{}", self.i18n.t("status-name-required"));
                return;
            }
        };

        let repository = self.repository.as_ref();
        let pending = &request;
        let result = with_retry(&self.recovery, "save", move || pending.execute(repository)).await;
        self.session.finish_save(result);

        match (self.session.status(), self.session.loaded_record()) {
            (PersistenceStatus::Failed(error), _) => {
                println!("{}", self.i18n.t_args("status-save-failed", &[("error", error)]))
            }
            (_, Some(record)) => println!(
                "{}",
                self.i18n.t_args("status-saved", &[("name", &record.name), ("id", &record.id)])
            ),
            _ => {}
        }
    }

    async fn list(&self) {
        let repository = self.repository.as_ref();
        match with_retry(&self.recovery, "list", move || repository.list()).await {
            Ok(records) if records.is_empty() => println!("{}", self.i18n.t("shell-no-batches")),
            Ok(records) => {
                for record in records {
                    let created = record.created_at.format("%Y-%m-%d %H:%M").to_string();
                    println!(
                        "{}",
                        self.i18n.t_args(
                            "shell-batch-line",
                            &[("id", &record.id), ("name", &record.batch.name), ("created", &created)],
                        )
                    );
                }
            }
            Err(e) => println!("{}", self.i18n.t_args("status-store-failed", &[("error", &e.to_string())])),
        }
    }

    async fn load(&mut self, id: &str) {
        let repository = self.repository.as_ref();
        let records = match with_retry(&self.recovery, "load", move || repository.list()).await {
            Ok(records) => records,
            Err(e) => {
                println!("{}", self.i18n.t_args("status-store-failed", &[("error", &e.to_string())]));
                return;
            }
        };

        match records.into_iter().find(|record| record.id == id) {
            Some(record) => {
                let name = record.batch.name.clone();
                let advisories = self.session.load(record).to_vec();
                println!("{}", self.i18n.t_args("status-loaded", &[("name", &name)]));
                self.print_advisories(&advisories);
            }
            None => println!("{}", self.i18n.t_args("status-not-found", &[("id", id)])),
        }
    }

    async fn delete(&mut self, id: &str) {
        let repository = self.repository.as_ref();
        match with_retry(&self.recovery, "delete", move || repository.delete(id)).await {
            Ok(true) => {
                self.session.forget_record(id);
                println!("{}", self.i18n.t_args("status-deleted", &[("id", id)]));
            }
            Ok(false) => println!("{}", self.i18n.t_args("status-not-found", &[("id", id)])),
            Err(e) => println!("{}", self.i18n.t_args("status-store-failed", &[("error", &e.to_string())])),
        }
    }

    fn set_field(&mut self, args: &[&str]) -> bool {
        let (Some(index), Some(label)) = (parse_index(args.first().copied()), args.get(1)) else {
            return false;
        };
        let value = args[2..].join(" ");

        if label.eq_ignore_ascii_case("name") {
            self.commit(Edit::name(index, &value));
            return true;
        }
        match QuantityField::from_label(label) {
            Some(QuantityField::TotalWeight) => {
                self.session.focus_total_weight(index);
                let mut shown: Vec<Advisory> = self
                    .session
                    .type_total_weight(index, &value)
                    .iter()
                    .filter(|advisory| advisory.is_rejection())
                    .cloned()
                    .collect();
                shown.extend(self.session.blur_total_weight(index).iter().cloned());
                self.print_advisories(&shown);
                true
            }
            Some(field) => {
                self.commit(Edit::quantity(index, field, &value));
                true
            }
            None => false,
        }
    }

    async fn handle(&mut self, line: &str) -> Flow {
        let parts: Vec<&str> = line.split_whitespace().collect();
        let Some((&command, args)) = parts.split_first() else {
            return Flow::Continue;
        };
        let rest = args.join(" ");

        let understood = match command {
            "help" => {
                println!("{}", self.i18n.t("shell-help"));
                true
            }
            "name" => {
                self.commit(Edit::SetBatchName(rest));
                true
            }
            "unit-weight" => {
                self.commit(Edit::SetUnitWeight(rest));
                true
            }
            "count" => {
                self.commit(Edit::SetUnitCount(rest));
                true
            }
            "auto" => match args.first().copied() {
                Some("on") => {
                    self.commit(Edit::ToggleAutoMode(true));
                    true
                }
                Some("off") => {
                    self.commit(Edit::ToggleAutoMode(false));
                    true
                }
                _ => false,
            },
            "set" => self.set_field(args),
            "free" => match parse_index(args.first().copied()) {
                Some(index) => {
                    self.commit(Edit::SetFreeIngredient(index));
                    true
                }
                None => false,
            },
            "add" => {
                self.commit(Edit::AddIngredient);
                true
            }
            "remove" => match parse_index(args.first().copied()) {
                Some(index) => {
                    self.commit(Edit::RemoveIngredient(index));
                    true
                }
                None => false,
            },
            "unit" => match args.first().and_then(|symbol| WeightUnit::from_symbol(symbol)) {
                Some(unit) => {
                    self.session.set_weight_unit(unit);
                    true
                }
                None => false,
            },
            "show" => {
                println!("{}", self.render());
                true
            }
            "save" => {
                self.save().await;
                true
            }
            "list" => {
                self.list().await;
                true
            }
            "load" if !rest.is_empty() => {
                self.load(&rest).await;
                true
            }
            "delete" if !rest.is_empty() => {
                self.delete(&rest).await;
                true
            }
            "reset" => {
                self.commit(Edit::Reset);
                true
            }
            "quit" | "exit" => {
                println!("{}", self.i18n.t("shell-goodbye"));
                return Flow::Quit;
            }
            "load" | "delete" => false,
            _ => {
                println!("{}", self.i18n.t_args("shell-unknown-command", &[("command", command)]));
                return Flow::Continue;
            }
        };

        if !understood {
            println!("{}", self.i18n.t_args("shell-invalid-arguments", &[("command", command)]));
        }
        Flow::Continue
    }
}

async fn open_repository(config: &AppConfig) -> Result<Arc<dyn BatchRepository>> {
    match &config.database_url {
        Some(url) => {
            info!("Using PostgreSQL batch store");
            let repository = PgBatchRepository::connect(url)
                .await
                .context("Failed to open PostgreSQL batch store")?;
            Ok(Arc::new(repository))
        }
        None => {
            info!("Using JSON batch store at {}", config.store_path.display());
            Ok(Arc::new(JsonFileBatchRepository::new(&config.store_path)))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    init_tracing();
    info!("Starting batch calculator");

    let config = AppConfig::from_env().context("Invalid configuration")?;
    let repository = open_repository(&config).await?;
    let i18n = LocalizationManager::with_language(&config.language)?;

    let mut shell = Shell {
        session: BatchSession::with_unit(config.weight_unit),
        repository,
        i18n,
        recovery: config.recovery.clone(),
    };

    println!("{}", shell.i18n.t("shell-welcome"));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("Failed to read from stdin")? {
        if let Flow::Quit = shell.handle(line.trim()).await {
            break;
        }
    }

    Ok(())
}
