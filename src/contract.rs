// This file is part of TRINCI.
//
// Copyright (C) 2021 Affidaty Spa.
//
// TRINCI is free software: you can redistribute it and/or modify it under
// the terms of the GNU Affero General Public License as published by the
// Free Software Foundation, either version 3 of the License, or (at your
// option) any later version.
//
// TRINCI is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or
// FITNESS FOR A PARTICULAR PURPOSE. See the GNU Affero General Public License
// for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with TRINCI. If not, see <https://www.gnu.org/licenses/>.

//! Probe contract.
//!
//! Pure validation predicate over a proposed transaction. Evaluated by the
//! launcher before signing and independently by the target before
//! countersigning. The first broken rule short-circuits the evaluation.

use crate::{
    base::{CommandData, ContractState, ProbeState, TransactionData},
    crypto::PublicKey,
    Error, ErrorKind, Result,
};
use std::fmt::Display;

/// Class a restricted probe is allowed to visit.
pub const REFERENCE_CLASS: &str = "planet";

/// Contract rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    SingleLaunchCommand,
    NoInputs,
    SingleOutput,
    NotSelfAddressed,
    ParticipantsSign,
    NonEmptyMessage,
    TargetHasClass,
    RestrictedToPlanets,
}

impl Display for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use Rule::*;
        let msg = match self {
            SingleLaunchCommand => "A single Launch command is required.",
            NoInputs => "No inputs should be consumed when launching a Probe.",
            SingleOutput => "Only one output state should be created.",
            NotSelfAddressed => "The launcher and the target cannot be the same entity.",
            ParticipantsSign => "All of the participants must be signers.",
            NonEmptyMessage => "The message's value must be non-empty.",
            TargetHasClass => "Solar System Objects Require an Org Unit in the x500 name",
            RestrictedToPlanets => "Planetary Probes Must only visit planets",
        };
        write!(f, "{}", msg)
    }
}

fn ensure(cond: bool, rule: Rule) -> std::result::Result<(), Rule> {
    match cond {
        true => Ok(()),
        false => Err(rule),
    }
}

/// Record kind specific rules.
fn check_probe(probe: &ProbeState, signers: &[PublicKey]) -> std::result::Result<(), Rule> {
    ensure(probe.launcher != probe.target, Rule::NotSelfAddressed)?;
    ensure(
        probe
            .participants()
            .iter()
            .all(|party| signers.contains(&party.owning_key)),
        Rule::ParticipantsSign,
    )?;
    ensure(!probe.message.is_empty(), Rule::NonEmptyMessage)?;
    let class = probe.target.name.class().ok_or(Rule::TargetHasClass)?;
    if probe.restricted_to_peer_class {
        ensure(
            class.eq_ignore_ascii_case(REFERENCE_CLASS),
            Rule::RestrictedToPlanets,
        )?;
    }
    Ok(())
}

/// Evaluate all the rules, returning the first broken one.
pub fn check(data: &TransactionData) -> std::result::Result<(), Rule> {
    let mut launch = data
        .commands
        .iter()
        .filter(|cmd| cmd.value == CommandData::Launch);
    let command = match (launch.next(), launch.next()) {
        (Some(cmd), None) => cmd,
        _ => return Err(Rule::SingleLaunchCommand),
    };
    ensure(data.inputs.is_empty(), Rule::NoInputs)?;
    ensure(data.outputs.len() == 1, Rule::SingleOutput)?;
    match &data.outputs[0] {
        ContractState::Probe(probe) => check_probe(probe, &command.signers),
    }
}

/// Validate a transaction payload.
/// A broken rule is reported as `ContractViolation` carrying the rule message.
pub fn verify(data: &TransactionData) -> Result<()> {
    check(data).map_err(|rule| {
        debug!("[contract] violation: {}", rule);
        Error::new_ext(ErrorKind::ContractViolation, rule.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::{
        schema::tests::{create_test_data, earth, mars, pluto},
        Command, Party, X500Name,
    };
    use uuid::Uuid;

    fn probe_mut(data: &mut TransactionData) -> &mut ProbeState {
        match &mut data.outputs[0] {
            ContractState::Probe(probe) => probe,
        }
    }

    fn with_target_unit(unit: &str) -> TransactionData {
        let mut target = mars();
        target.name.organisation_unit = Some(unit.to_owned());
        create_test_data(earth(), target)
    }

    #[test]
    fn valid_launch() {
        let data = create_test_data(earth(), pluto());

        assert_eq!(check(&data), Ok(()));
        assert!(verify(&data).is_ok());
    }

    #[test]
    fn inputs_are_refused() {
        let mut data = create_test_data(earth(), mars());
        data.inputs.push(Uuid::new_v4());

        assert_eq!(check(&data), Err(Rule::NoInputs));
    }

    #[test]
    fn multiple_outputs_are_refused() {
        let mut data = create_test_data(earth(), mars());
        data.outputs.push(data.outputs[0].clone());

        assert_eq!(check(&data), Err(Rule::SingleOutput));
    }

    #[test]
    fn no_outputs_are_refused() {
        let mut data = create_test_data(earth(), mars());
        data.outputs.clear();

        assert_eq!(check(&data), Err(Rule::SingleOutput));
    }

    #[test]
    fn self_addressed_probe() {
        let data = create_test_data(earth(), earth());

        let err = verify(&data).unwrap_err();

        assert_eq!(err.kind, ErrorKind::ContractViolation);
        assert_eq!(
            err.detail().unwrap(),
            "The launcher and the target cannot be the same entity."
        );
    }

    #[test]
    fn self_addressed_under_another_name() {
        let alias = Party::new(
            X500Name::new("Terra", "THIRD", "GB").with_unit("planet"),
            earth().owning_key,
        );
        let data = create_test_data(earth(), alias);

        assert_eq!(check(&data), Err(Rule::NotSelfAddressed));
    }

    #[test]
    fn missing_participant_signer() {
        let mut data = create_test_data(earth(), mars());
        data.commands[0].signers.pop();

        assert_eq!(check(&data), Err(Rule::ParticipantsSign));
    }

    #[test]
    fn missing_launch_command() {
        let mut data = create_test_data(earth(), mars());
        data.commands.clear();

        assert_eq!(check(&data), Err(Rule::SingleLaunchCommand));
    }

    #[test]
    fn duplicated_launch_command() {
        let mut data = create_test_data(earth(), mars());
        let signers = vec![earth().owning_key, mars().owning_key];
        data.commands.push(Command::new(CommandData::Launch, signers));

        assert_eq!(check(&data), Err(Rule::SingleLaunchCommand));
    }

    #[test]
    fn empty_message() {
        let mut data = create_test_data(earth(), mars());
        probe_mut(&mut data).message.clear();

        assert_eq!(check(&data), Err(Rule::NonEmptyMessage));
    }

    #[test]
    fn target_without_class() {
        let mut data = create_test_data(earth(), mars());
        probe_mut(&mut data).target.name.organisation_unit = None;

        assert_eq!(check(&data), Err(Rule::TargetHasClass));
    }

    #[test]
    fn target_with_blank_class() {
        let data = with_target_unit("   ");

        assert_eq!(check(&data), Err(Rule::TargetHasClass));
    }

    #[test]
    fn restricted_probe_to_dwarf_planet() {
        let mut data = create_test_data(earth(), pluto());
        probe_mut(&mut data).restricted_to_peer_class = true;

        let err = verify(&data).unwrap_err();

        assert_eq!(err.kind, ErrorKind::ContractViolation);
        assert_eq!(err.detail().unwrap(), "Planetary Probes Must only visit planets");
    }

    #[test]
    fn restricted_probe_class_is_case_insensitive() {
        for unit in ["planet", "Planet", "PLANET", "pLaNeT"] {
            let mut data = with_target_unit(unit);
            probe_mut(&mut data).restricted_to_peer_class = true;

            assert_eq!(check(&data), Ok(()), "unit: {}", unit);
        }
    }

    #[test]
    fn unrestricted_probe_visits_any_class() {
        for unit in ["dwarf-planet", "moon", "asteroid"] {
            let data = with_target_unit(unit);

            assert_eq!(check(&data), Ok(()), "unit: {}", unit);
        }
    }

    #[test]
    fn first_broken_rule_wins() {
        let mut data = create_test_data(earth(), earth());
        data.inputs.push(Uuid::new_v4());
        probe_mut(&mut data).message.clear();

        assert_eq!(check(&data), Err(Rule::NoInputs));
    }
}
