use dotenv::dotenv;
use dre_ledger::*;
use std::path::PathBuf;

fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = PipelineConfig::load(config_path.as_deref())?;

    println!("📊 Processing {}...\n", config.input.path.display());

    let report = match process_dre(&config)? {
        RunOutcome::Completed(report) => report,
        RunOutcome::NoNewData => {
            println!("ℹ️  No new data to process.");
            return Ok(());
        }
    };

    let summary = &report.summary;
    println!("✅ Processed {} records for {}", summary.records_processed, summary.reference_year);
    println!("   Groups: {}", summary.hierarchy.total_groups);
    println!("   Detail categories: {}", summary.hierarchy.total_details);
    println!(
        "   Narratives: {} generated, {} empty",
        summary.narratives.narratives_generated, summary.narratives.empty_narratives
    );
    println!("   Repaired cells: {}", summary.sanitize.cells_repaired);
    println!(
        "   Totals: {} in, {} out, {} net",
        format_amount(summary.totals.positive)?,
        format_amount(summary.totals.negative)?,
        format_amount(summary.totals.total)?
    );

    println!("\n📁 Artifacts:");
    println!("   {}", report.persisted.snapshot.display());
    println!("   {}", report.persisted.categories.display());
    println!("   {}", report.persisted.narrative_report.display());

    if std::env::var("DRE_EXPORT_FINETUNE").is_ok() {
        let output = config.output_dir.join("finetune_dataset.jsonl");
        let result = build_finetune_dataset(
            &report.persisted.narrative_report,
            &report.persisted.categories,
            &output,
            JsonlFormat::Gemini,
        )?;

        println!("\n🧠 Fine-tune dataset: {}", result.output_path.display());
        println!(
            "   {} pairs, valid={}",
            result.validation.total_pairs, result.validation.is_valid
        );
        for (group, coverage) in &result.category_coverage {
            println!("   - {}: {:.1}%", group, coverage * 100.0);
        }
    }

    Ok(())
}
