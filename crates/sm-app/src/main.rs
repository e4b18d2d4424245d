use anyhow::{Context, Result};
use clap::Parser;
use sm_core::ClassifierConfig;
use sm_model::Classifier;

mod cli;
mod discover;
mod evaluate;

const RULE: &str = "##################################################";

fn main() -> Result<()> {
    // 1. Parser CLI
    let cli = cli::Cli::parse();

    // 2. Initialiser le logging
    env_logger::Builder::new()
        .filter_level(cli.level_filter())
        .init();

    // 3. Charger la config et appliquer les overrides CLI
    let mut config = resolve_config(&cli)?;
    if let Some(ref sep) = cli.charsplit {
        config.discovery.label_separator.clone_from(sep);
        config.clamp_all();
    }
    if cli.less_verbose {
        config.verbose = false;
    }

    // 4. Lister les fichiers
    let test_files = discover::discover(&cli.testpath, &config.discovery)?;

    // 5. Entraîner ou charger
    let classifier = if let Some(ref model) = cli.load_model {
        let classifier = Classifier::load(model, config.clone())
            .with_context(|| format!("Chargement du modèle {}", model.display()))?;
        log::info!("Modèle chargé depuis {}", model.display());
        classifier
    } else {
        let train_files = discover::discover(&cli.trainpath, &config.discovery)?;
        if config.verbose {
            print_table(&cli.trainpath, &train_files);
        }
        println!("{RULE}");
        println!("TRAINING");
        let mut classifier = Classifier::new(config.clone())?;
        classifier
            .train(&cli.trainpath, &train_files)
            .with_context(|| format!("Entraînement sur {}", cli.trainpath.display()))?;
        if let Some(ref out) = cli.save_model {
            classifier
                .save(out)
                .with_context(|| format!("Sauvegarde du modèle {}", out.display()))?;
        }
        classifier
    };
    if config.verbose {
        print_table(&cli.testpath, &test_files);
    }

    // 6. Tester
    println!("{RULE}");
    println!("TESTING");
    if cli.load_model.is_none() && cli.trainpath == cli.testpath {
        println!(
            " (nb testing on the same files as used for training - for true evaluation please train and test on independent data):"
        );
    }
    let evaluation = evaluate::Evaluation::run(&classifier, &cli.testpath, &test_files)
        .with_context(|| format!("Test sur {}", cli.testpath.display()))?;
    for miss in evaluation.predictions.iter().filter(|p| !p.is_correct()) {
        log::info!(
            "{} : attendu {}, obtenu {}",
            miss.path.display(),
            miss.expected,
            miss.inferred
        );
    }
    println!("{}", evaluation.summary());
    log::debug!("Précision : {:.1} %", evaluation.accuracy() * 100.0);

    Ok(())
}

fn print_table(folder: &std::path::Path, files: &[sm_core::TrainingExample]) {
    println!("Class-labels and filenames to be used from {}:", folder.display());
    for ex in files {
        println!(" {}: \t {}", ex.label, ex.path.display());
    }
}

/// Config file if present, defaults otherwise.
fn resolve_config(cli: &cli::Cli) -> Result<ClassifierConfig> {
    if cli.config.exists() {
        sm_core::config::load_config(&cli.config)
    } else {
        log::warn!(
            "Config introuvable : {}. Utilisation des défauts.",
            cli.config.display()
        );
        Ok(ClassifierConfig::default())
    }
}
