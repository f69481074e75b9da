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

//! Transaction assembly.

use crate::{
    base::{Command, CommandData, ContractState, Party, ProbeState, TransactionData, UnsignedTransaction},
    contract, Result,
};
use uuid::Uuid;

/// Incremental transaction builder.
#[derive(Debug, Clone)]
pub struct TransactionBuilder {
    notary: Party,
    inputs: Vec<Uuid>,
    outputs: Vec<ContractState>,
    commands: Vec<Command>,
}

impl TransactionBuilder {
    pub fn new(notary: Party) -> Self {
        TransactionBuilder {
            notary,
            inputs: vec![],
            outputs: vec![],
            commands: vec![],
        }
    }

    pub fn add_input(mut self, linear_id: Uuid) -> Self {
        self.inputs.push(linear_id);
        self
    }

    pub fn add_output(mut self, state: ContractState) -> Self {
        self.outputs.push(state);
        self
    }

    pub fn add_command(mut self, command: Command) -> Self {
        self.commands.push(command);
        self
    }

    /// Transaction payload as built so far.
    pub fn data(&self) -> TransactionData {
        TransactionData {
            inputs: self.inputs.clone(),
            outputs: self.outputs.clone(),
            commands: self.commands.clone(),
            notary: self.notary.clone(),
        }
    }

    /// Validate against the contract and produce the unsigned transaction.
    pub fn build(self) -> Result<UnsignedTransaction> {
        let data = TransactionData {
            inputs: self.inputs,
            outputs: self.outputs,
            commands: self.commands,
            notary: self.notary,
        };
        contract::verify(&data)?;
        Ok(UnsignedTransaction { data })
    }
}

/// Assemble a probe launch.
/// A new record id is allocated and both the launcher and the target are
/// required signers of the `Launch` command.
pub fn launch(
    message: &str,
    restricted_to_peer_class: bool,
    launcher: Party,
    target: Party,
    notary: Party,
) -> Result<UnsignedTransaction> {
    let signers = vec![launcher.owning_key.clone(), target.owning_key.clone()];
    let probe = ProbeState::new(message, restricted_to_peer_class, launcher, target);
    TransactionBuilder::new(notary)
        .add_output(ContractState::Probe(probe))
        .add_command(Command::new(CommandData::Launch, signers))
        .build()
}
